//! Current/voltage/power acquisition
//!
//! The sampler reads every monitor on a fixed period and publishes the latest
//! values as a [`Snapshot`]. A failed read leaves that sensor's previous
//! values in place; monitors on the I²C bus may NACK transiently and the
//! recorder always writes what is currently published.

mod ina226;

pub use ina226::{Ina226, Ina226Bank};

use log::{debug, warn};
use thiserror_no_std::Error;

use crate::config::SENSOR_COUNT;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("I2C transfer with sensor 0x{address:02x} failed")]
    Bus { address: u8 },
    #[error("sensor index {0} out of range")]
    NoSuchSensor(usize),
}

/// One reading from a power monitor.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Reading {
    /// Bus voltage in volts.
    pub bus_volts: f32,
    /// Current in milliamps.
    pub current_ma: f32,
    /// Power in watts.
    pub power_w: f32,
}

/// A set of power monitors addressed by sensor index.
pub trait PowerSensors {
    fn read(&mut self, index: usize) -> Result<Reading, SensorError>;
}

/// Latest published values, one slot per sensor.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Snapshot {
    pub volts: [f32; SENSOR_COUNT],
    pub current_ma: [f32; SENSOR_COUNT],
    pub power_w: [f32; SENSOR_COUNT],
}

impl Snapshot {
    pub fn reading(&self, index: usize) -> Reading {
        Reading {
            bus_volts: self.volts[index],
            current_ma: self.current_ma[index],
            power_w: self.power_w[index],
        }
    }

    /// Current in amps, the unit used on every wire format.
    pub fn current_amps(&self, index: usize) -> f32 {
        self.current_ma[index] / 1000.0
    }
}

/// Periodic reader that owns the published [`Snapshot`].
pub struct Sampler<S: PowerSensors> {
    sensors: S,
    snapshot: Snapshot,
    failed_reads: u32,
}

impl<S: PowerSensors> Sampler<S> {
    pub fn new(sensors: S) -> Self {
        Self {
            sensors,
            snapshot: Snapshot::default(),
            failed_reads: 0,
        }
    }

    /// Read every sensor once, overwriting the published values.
    pub fn sample_all(&mut self) {
        for index in 0..SENSOR_COUNT {
            match self.sensors.read(index) {
                Ok(reading) => {
                    self.snapshot.volts[index] = reading.bus_volts;
                    self.snapshot.current_ma[index] = reading.current_ma;
                    self.snapshot.power_w[index] = reading.power_w;
                }
                Err(e) => {
                    self.failed_reads = self.failed_reads.wrapping_add(1);
                    debug!("Keeping last value for sensor {}: {}", index, e);
                    if self.failed_reads % 1000 == 0 {
                        warn!("{} sensor reads failed since boot", self.failed_reads);
                    }
                }
            }
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn failed_reads(&self) -> u32 {
        self.failed_reads
    }

    pub fn sensors_mut(&mut self) -> &mut S {
        &mut self.sensors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted {
        fail: [bool; SENSOR_COUNT],
        value: f32,
    }

    impl PowerSensors for Scripted {
        fn read(&mut self, index: usize) -> Result<Reading, SensorError> {
            if self.fail[index] {
                return Err(SensorError::Bus {
                    address: 0x40 + index as u8,
                });
            }
            Ok(Reading {
                bus_volts: self.value + index as f32,
                current_ma: 100.0 * self.value,
                power_w: 0.5 * self.value,
            })
        }
    }

    #[test]
    fn test_sample_all_publishes_every_sensor() {
        let mut sampler = Sampler::new(Scripted {
            fail: [false; SENSOR_COUNT],
            value: 12.0,
        });
        sampler.sample_all();

        let snap = sampler.snapshot();
        assert_eq!(snap.volts[0], 12.0);
        assert_eq!(snap.volts[6], 18.0);
        assert_eq!(snap.current_ma[3], 1200.0);
        assert_eq!(snap.current_amps(3), 1.2);
        assert_eq!(snap.power_w[5], 6.0);
    }

    #[test]
    fn test_failed_read_keeps_previous_value() {
        let mut sampler = Sampler::new(Scripted {
            fail: [false; SENSOR_COUNT],
            value: 5.0,
        });
        sampler.sample_all();

        let sensors = sampler.sensors_mut();
        sensors.fail[2] = true;
        sensors.value = 9.0;
        sampler.sample_all();

        let snap = sampler.snapshot();
        assert_eq!(snap.volts[2], 7.0, "failed sensor keeps its last volts");
        assert_eq!(snap.current_ma[2], 500.0);
        assert_eq!(snap.volts[1], 10.0, "healthy sensors still update");
        assert_eq!(sampler.failed_reads(), 1);
    }
}
