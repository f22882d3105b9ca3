//! The bench: simulated pins from the core, host storage, sockets and the
//! simulator display from this crate.

use std::cell::Cell;
use std::io;
use std::net::Ipv4Addr;
use std::path::Path;
use std::rc::Rc;

use powerbox_core::board::{Board, BoardParts};
use powerbox_core::config::{BUS_SENSOR_INDEX, CHANNEL_COUNT, SENSOR_COUNT};
use powerbox_core::sensors::{PowerSensors, Reading, SensorError};
use powerbox_core::sim::{SimPin, SimPwm, SimSerial, SimSwitch};
use powerbox_core::time::Clock;

use crate::display::HostPanel;
use crate::ethernet::HostEthernet;
use crate::host::{DirVolume, FileEeprom, HostClock, HostWall};

const EEPROM_BYTES: usize = 4096;
const SUPPLY_VOLTS: f32 = 24.0;

/// Nominal load per channel when switched on, in mA.
const LOAD_MA: [f32; CHANNEL_COUNT] = [850.0, 1200.0, 400.0, 2300.0, 1750.0, 600.0];

/// Power monitors reporting a plausible load for whichever outputs are on.
pub struct SyntheticSensors {
    outputs: [SimPin; CHANNEL_COUNT],
    clock: HostClock,
}

impl SyntheticSensors {
    fn ripple(&self, index: usize) -> f32 {
        let t = self.clock.now_ms() as f32 / 1000.0;
        (t * 0.7 + index as f32).sin()
    }

    fn channel(&self, index: usize) -> Reading {
        if !self.outputs[index].is_high() {
            return Reading {
                bus_volts: 0.02 * self.ripple(index).max(0.0),
                ..Reading::default()
            };
        }
        let bus_volts = SUPPLY_VOLTS - 0.15 + 0.05 * self.ripple(index);
        let current_ma = LOAD_MA[index] * (1.0 + 0.04 * self.ripple(index + 3));
        Reading {
            bus_volts,
            current_ma,
            power_w: bus_volts * current_ma / 1000.0,
        }
    }
}

impl PowerSensors for SyntheticSensors {
    fn read(&mut self, index: usize) -> Result<Reading, SensorError> {
        match index {
            i if i < CHANNEL_COUNT => Ok(self.channel(i)),
            BUS_SENSOR_INDEX => {
                let current_ma: f32 = (0..CHANNEL_COUNT).map(|i| self.channel(i).current_ma).sum();
                let bus_volts = SUPPLY_VOLTS + 0.03 * self.ripple(SENSOR_COUNT);
                Ok(Reading {
                    bus_volts,
                    current_ma,
                    power_w: bus_volts * current_ma / 1000.0,
                })
            }
            i => Err(SensorError::NoSuchSensor(i)),
        }
    }
}

/// Handles the console keeps after the board is handed to the app.
pub struct BenchHandles {
    pub serial: SimSerial,
    pub panel: HostPanel,
    pub switches: [SimSwitch; CHANNEL_COUNT],
    pub external_card: Rc<Cell<bool>>,
}

pub struct HostBoard {
    outputs: [SimPin; CHANNEL_COUNT],
    switches: [SimSwitch; CHANNEL_COUNT],
    leds: [SimPin; 3],
    fan: SimPwm,
    internal_sd: DirVolume,
    external_sd: DirVolume,
    eeprom: FileEeprom,
    ethernet: HostEthernet,
    serial: SimSerial,
    panel: HostPanel,
}

impl HostBoard {
    /// Lay out the bench under `data_dir`: `internal/`, `external/` and
    /// `eeprom.bin`.
    pub fn open(data_dir: &Path, bind: Ipv4Addr) -> io::Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            outputs: std::array::from_fn(|_| SimPin::new()),
            switches: std::array::from_fn(|_| SimSwitch::new(false)),
            leds: std::array::from_fn(|_| SimPin::new()),
            fan: SimPwm::new(),
            internal_sd: DirVolume::new(data_dir.join("internal")),
            external_sd: DirVolume::new(data_dir.join("external")),
            eeprom: FileEeprom::open(&data_dir.join("eeprom.bin"), EEPROM_BYTES)?,
            ethernet: HostEthernet::new(bind),
            serial: SimSerial::new(),
            panel: HostPanel::new(),
        })
    }

    pub fn handles(&self) -> BenchHandles {
        BenchHandles {
            serial: self.serial.clone(),
            panel: self.panel.clone(),
            switches: self.switches.clone(),
            external_card: self.external_sd.presence(),
        }
    }
}

impl Board for HostBoard {
    type Output = SimPin;
    type Switch = SimSwitch;
    type Led = SimPin;
    type Fan = SimPwm;
    type Sensors = SyntheticSensors;
    type Internal = DirVolume;
    type External = DirVolume;
    type Nv = FileEeprom;
    type Ethernet = HostEthernet;
    type Clock = HostClock;
    type Wall = HostWall;
    type Serial = SimSerial;
    type Panel = HostPanel;

    fn into_parts(self) -> BoardParts<Self> {
        let [power_led, lock_led, stop_led] = self.leds;
        BoardParts {
            sensors: SyntheticSensors {
                outputs: self.outputs.clone(),
                clock: HostClock::new(),
            },
            outputs: self.outputs,
            switches: self.switches.map(Some),
            power_led,
            lock_led,
            stop_led,
            fan: self.fan,
            internal_sd: self.internal_sd,
            external_sd: self.external_sd,
            eeprom: self.eeprom,
            ethernet: self.ethernet,
            clock: HostClock::new(),
            wall: HostWall,
            serial: self.serial,
            panel: self.panel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensors_follow_outputs() {
        let outputs: [SimPin; CHANNEL_COUNT] = std::array::from_fn(|_| SimPin::new());
        let mut sensors = SyntheticSensors {
            outputs: outputs.clone(),
            clock: HostClock::new(),
        };
        let off = sensors.read(3).unwrap();
        assert_eq!(off.current_ma, 0.0, "no load while off");

        use embedded_hal::digital::OutputPin;
        let mut pin = outputs[3].clone();
        pin.set_high().unwrap();
        let on = sensors.read(3).unwrap();
        assert!(on.current_ma > 2000.0 && on.current_ma < 2500.0);
        let bus = sensors.read(BUS_SENSOR_INDEX).unwrap();
        assert!(bus.current_ma >= on.current_ma * 0.9, "bus carries the channel load");
        assert_eq!(sensors.read(SENSOR_COUNT), Err(SensorError::NoSuchSensor(SENSOR_COUNT)));
    }
}
