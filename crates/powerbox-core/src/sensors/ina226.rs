//! Blocking INA226 driver over `embedded-hal` I²C.

use embedded_hal::i2c::I2c;
use log::{info, warn};

use super::{PowerSensors, Reading, SensorError};
use crate::config::{SENSOR_ADDRESSES, SENSOR_COUNT};

const REG_CONFIG: u8 = 0x00;
const REG_BUS_VOLTAGE: u8 = 0x02;
const REG_POWER: u8 = 0x03;
const REG_CURRENT: u8 = 0x04;
const REG_CALIBRATION: u8 = 0x05;

/// Continuous shunt and bus conversion, 1.1 ms conversion time, no averaging.
const CONFIG_CONTINUOUS: u16 = 0x4127;

/// Bus voltage register LSB in volts.
const BUS_VOLTAGE_LSB_V: f32 = 0.001_25;

/// Calibration for an 8 A full scale through a 10 mΩ shunt.
const MAX_CURRENT_A: f32 = 8.0;
const SHUNT_OHMS: f32 = 0.01;

/// Shunt calibration derived from the full-scale current.
#[derive(Debug, Clone, Copy)]
struct Calibration {
    current_lsb_a: f32,
    register: u16,
}

impl Calibration {
    fn new(max_current_a: f32, shunt_ohms: f32) -> Self {
        let current_lsb_a = max_current_a / 32_768.0;
        let register = (0.005_12 / (current_lsb_a * shunt_ohms)) as u16;
        Self {
            current_lsb_a,
            register,
        }
    }

    fn power_lsb_w(&self) -> f32 {
        self.current_lsb_a * 25.0
    }
}

/// A single INA226 at a fixed address.
pub struct Ina226 {
    address: u8,
    calibration: Calibration,
    configured: bool,
}

impl Ina226 {
    pub fn new(address: u8) -> Self {
        Self {
            address,
            calibration: Calibration::new(MAX_CURRENT_A, SHUNT_OHMS),
            configured: false,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    fn bus_err(&self) -> SensorError {
        SensorError::Bus {
            address: self.address,
        }
    }

    fn write_register<I: I2c>(&self, i2c: &mut I, reg: u8, value: u16) -> Result<(), SensorError> {
        let [hi, lo] = value.to_be_bytes();
        i2c.write(self.address, &[reg, hi, lo])
            .map_err(|_| self.bus_err())
    }

    fn read_register<I: I2c>(&self, i2c: &mut I, reg: u8) -> Result<u16, SensorError> {
        let mut buf = [0u8; 2];
        i2c.write_read(self.address, &[reg], &mut buf)
            .map_err(|_| self.bus_err())?;
        Ok(u16::from_be_bytes(buf))
    }

    /// Write configuration and calibration. Called lazily before the first
    /// read, and again after any failed read so a monitor that browned out
    /// is recalibrated.
    pub fn configure<I: I2c>(&mut self, i2c: &mut I) -> Result<(), SensorError> {
        self.write_register(i2c, REG_CONFIG, CONFIG_CONTINUOUS)?;
        self.write_register(i2c, REG_CALIBRATION, self.calibration.register)?;
        self.configured = true;
        Ok(())
    }

    pub fn read<I: I2c>(&mut self, i2c: &mut I) -> Result<Reading, SensorError> {
        if !self.configured {
            self.configure(i2c)?;
        }

        let result = self.read_raw(i2c);
        if result.is_err() {
            self.configured = false;
        }
        result
    }

    fn read_raw<I: I2c>(&self, i2c: &mut I) -> Result<Reading, SensorError> {
        let bus = self.read_register(i2c, REG_BUS_VOLTAGE)?;
        let current = self.read_register(i2c, REG_CURRENT)? as i16;
        let power = self.read_register(i2c, REG_POWER)?;

        Ok(Reading {
            bus_volts: bus as f32 * BUS_VOLTAGE_LSB_V,
            current_ma: current as f32 * self.calibration.current_lsb_a * 1000.0,
            power_w: power as f32 * self.calibration.power_lsb_w(),
        })
    }
}

/// All seven monitors sharing one I²C bus.
pub struct Ina226Bank<I: I2c> {
    i2c: I,
    devices: [Ina226; SENSOR_COUNT],
}

impl<I: I2c> Ina226Bank<I> {
    pub fn new(i2c: I) -> Self {
        Self {
            i2c,
            devices: SENSOR_ADDRESSES.map(Ina226::new),
        }
    }

    /// Configure every monitor up front. Monitors that do not answer are
    /// retried on their first read.
    pub fn init(&mut self) {
        for device in self.devices.iter_mut() {
            match device.configure(&mut self.i2c) {
                Ok(()) => info!("INA226 at 0x{:02x} configured", device.address()),
                Err(e) => warn!("{}", e),
            }
        }
    }
}

impl<I: I2c> PowerSensors for Ina226Bank<I> {
    fn read(&mut self, index: usize) -> Result<Reading, SensorError> {
        let device = self
            .devices
            .get_mut(index)
            .ok_or(SensorError::NoSuchSensor(index))?;
        device.read(&mut self.i2c)
    }
}
