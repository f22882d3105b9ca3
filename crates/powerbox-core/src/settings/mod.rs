//! Persistent settings
//!
//! One postcard-encoded block at the start of the EEPROM, prefixed with its
//! little-endian `u16` length:
//!
//! ```text
//! [len lo][len hi][ StoredSettings (postcard) ... ]
//! ```
//!
//! A wrong magic or version, or a block that does not decode, is replaced by
//! defaults and written back. Individual out-of-range fields are repaired in
//! place; an invalid network block or a graph block failing its checksum is
//! reset on its own without touching the rest.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::graph::GraphSettings;
use crate::net::NetworkConfig;
use crate::script::SortOrder;

pub const SETTINGS_MAGIC: u32 = 0xDEAD_BEEF;
pub const SETTINGS_VERSION: u8 = 3;

/// Largest encoded block accepted from the EEPROM.
pub const SETTINGS_MAX_BYTES: usize = 1024;

pub const UPDATE_RATE_MIN_MS: u16 = 10;
pub const UPDATE_RATE_MAX_MS: u16 = 5000;
pub const UPDATE_RATE_DEFAULT_MS: u16 = 100;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsError {
    #[error("EEPROM access outside {0} bytes")]
    OutOfRange(usize),
    #[error("EEPROM I/O failure")]
    Io,
    #[error("settings block could not be encoded")]
    Encode,
}

/// Byte-addressed non-volatile memory.
pub trait NvStore {
    fn capacity(&self) -> usize;

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), SettingsError>;

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), SettingsError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemSettings {
    pub fan_on: bool,
    pub fan_speed: u8,
    /// Reported to clients only; the sampler cadence is fixed.
    pub update_rate_ms: u16,
    pub use_24h: bool,
    pub dark_mode: bool,
    pub sort_order: SortOrder,
    pub csv_output: bool,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            fan_on: true,
            fan_speed: 255,
            update_rate_ms: UPDATE_RATE_DEFAULT_MS,
            use_24h: true,
            dark_mode: true,
            sort_order: SortOrder::Name,
            csv_output: true,
        }
    }
}

impl SystemSettings {
    /// Apply a fan speed request: `fan_on` follows `speed > 0`.
    pub fn set_fan_speed(&mut self, speed: i64) -> u8 {
        self.fan_speed = speed.clamp(0, 255) as u8;
        self.fan_on = self.fan_speed > 0;
        self.fan_speed
    }

    pub fn set_update_rate(&mut self, ms: i64) -> u16 {
        self.update_rate_ms =
            ms.clamp(UPDATE_RATE_MIN_MS as i64, UPDATE_RATE_MAX_MS as i64) as u16;
        self.update_rate_ms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Settings {
    pub system: SystemSettings,
    pub network: NetworkConfig,
    pub graph: GraphSettings,
}

/// On-EEPROM form.
#[derive(Serialize, Deserialize)]
struct StoredSettings {
    magic: u32,
    version: u8,
    fan_on: bool,
    fan_speed: u8,
    update_rate_ms: u16,
    use_24h: bool,
    dark_mode: bool,
    sort_order: u8,
    csv_output: bool,
    network: NetworkConfig,
    graph: GraphSettings,
    graph_checksum: u32,
}

impl From<&Settings> for StoredSettings {
    fn from(s: &Settings) -> Self {
        Self {
            magic: SETTINGS_MAGIC,
            version: SETTINGS_VERSION,
            fan_on: s.system.fan_on,
            fan_speed: s.system.fan_speed,
            update_rate_ms: s.system.update_rate_ms,
            use_24h: s.system.use_24h,
            dark_mode: s.system.dark_mode,
            sort_order: s.system.sort_order.code(),
            csv_output: s.system.csv_output,
            network: s.network,
            graph: s.graph,
            graph_checksum: s.graph.checksum(),
        }
    }
}

/// What [`Settings::load`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    /// Some fields were out of range and were reset.
    Repaired,
    /// The block was unusable and defaults were written.
    Defaulted,
}

impl StoredSettings {
    /// Convert to runtime settings, repairing bad fields.
    fn into_settings(self) -> (Settings, bool) {
        let mut repaired = false;

        let update_rate_ms = self
            .update_rate_ms
            .clamp(UPDATE_RATE_MIN_MS, UPDATE_RATE_MAX_MS);
        repaired |= update_rate_ms != self.update_rate_ms;

        let sort_order = SortOrder::from_code(self.sort_order);
        repaired |= sort_order.code() != self.sort_order;

        // A spinning fan cannot be off
        let fan_on = self.fan_on || self.fan_speed > 0;
        repaired |= fan_on != self.fan_on;

        let network = if self.network.is_valid() {
            self.network
        } else {
            warn!("Network settings invalid, using defaults");
            repaired = true;
            NetworkConfig::default()
        };

        let graph = if self.graph.checksum() == self.graph_checksum && self.graph.is_valid() {
            self.graph
        } else {
            warn!("Graph settings corrupt, using defaults");
            repaired = true;
            GraphSettings::default()
        };

        let settings = Settings {
            system: SystemSettings {
                fan_on,
                fan_speed: self.fan_speed,
                update_rate_ms,
                use_24h: self.use_24h,
                dark_mode: self.dark_mode,
                sort_order,
                csv_output: self.csv_output,
            },
            network,
            graph,
        };
        (settings, repaired)
    }
}

impl Settings {
    /// Load from `nv`, writing defaults back when the block is unusable.
    pub fn load<N: NvStore + ?Sized>(nv: &mut N) -> Result<(Self, LoadOutcome), SettingsError> {
        match Self::read_block(nv)? {
            Some(stored) if stored.magic == SETTINGS_MAGIC && stored.version == SETTINGS_VERSION => {
                let (settings, repaired) = stored.into_settings();
                if repaired {
                    settings.save(nv)?;
                    return Ok((settings, LoadOutcome::Repaired));
                }
                info!("Settings loaded");
                Ok((settings, LoadOutcome::Loaded))
            }
            Some(stored) => {
                warn!(
                    "Settings header mismatch (magic {:#010x}, version {}), writing defaults",
                    stored.magic, stored.version
                );
                Self::write_defaults(nv)
            }
            None => {
                warn!("Settings block unreadable, writing defaults");
                Self::write_defaults(nv)
            }
        }
    }

    fn write_defaults<N: NvStore + ?Sized>(
        nv: &mut N,
    ) -> Result<(Self, LoadOutcome), SettingsError> {
        let settings = Self::default();
        settings.save(nv)?;
        Ok((settings, LoadOutcome::Defaulted))
    }

    fn read_block<N: NvStore + ?Sized>(nv: &mut N) -> Result<Option<StoredSettings>, SettingsError> {
        let mut len = [0u8; 2];
        nv.read(0, &mut len)?;
        let len = u16::from_le_bytes(len) as usize;
        if len == 0 || len > SETTINGS_MAX_BYTES || len + 2 > nv.capacity() {
            return Ok(None);
        }
        let mut block = alloc::vec![0u8; len];
        nv.read(2, &mut block)?;
        Ok(postcard::from_bytes(&block).ok())
    }

    pub fn save<N: NvStore + ?Sized>(&self, nv: &mut N) -> Result<(), SettingsError> {
        let stored = StoredSettings::from(self);
        let block = postcard::to_allocvec(&stored).map_err(|_| SettingsError::Encode)?;
        if block.len() > SETTINGS_MAX_BYTES {
            return Err(SettingsError::Encode);
        }
        nv.write(0, &(block.len() as u16).to_le_bytes())?;
        nv.write(2, &block)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Bounds;
    use crate::sim::RamEeprom;

    fn stored_with(edit: impl FnOnce(&mut StoredSettings)) -> RamEeprom {
        let mut stored = StoredSettings::from(&Settings::default());
        edit(&mut stored);
        let block = postcard::to_allocvec(&stored).unwrap();
        let mut nv = RamEeprom::new(4096);
        nv.write(0, &(block.len() as u16).to_le_bytes()).unwrap();
        nv.write(2, &block).unwrap();
        nv
    }

    #[test]
    fn test_blank_eeprom_gets_defaults() {
        let mut nv = RamEeprom::new(4096);
        let (settings, outcome) = Settings::load(&mut nv).unwrap();
        assert_eq!(outcome, LoadOutcome::Defaulted);
        assert_eq!(settings, Settings::default());

        let (_, outcome) = Settings::load(&mut nv).unwrap();
        assert_eq!(outcome, LoadOutcome::Loaded, "defaults were written back");
    }

    #[test]
    fn test_save_then_load_preserves_fields() {
        let mut nv = RamEeprom::new(4096);
        let mut settings = Settings::default();
        settings.system.set_fan_speed(120);
        settings.system.set_update_rate(250);
        settings.system.use_24h = false;
        settings.system.dark_mode = false;
        settings.system.sort_order = SortOrder::LastUsed;
        settings.system.csv_output = false;
        settings.network.use_dhcp = false;
        settings.network.tcp_port = 9000;
        settings.graph.time_range_s = 60.0;
        settings.graph.channels[1].bounds[0] = Bounds::new(0.0, 1.5);
        settings.save(&mut nv).unwrap();

        let (loaded, outcome) = Settings::load(&mut nv).unwrap();
        assert_eq!(outcome, LoadOutcome::Loaded);
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_version_mismatch_rewrites_defaults() {
        let mut nv = stored_with(|s| {
            s.version = 2;
            s.fan_speed = 10;
        });
        let (settings, outcome) = Settings::load(&mut nv).unwrap();
        assert_eq!(outcome, LoadOutcome::Defaulted);
        assert_eq!(settings.system.fan_speed, 255);
    }

    #[test]
    fn test_out_of_range_fields_repaired() {
        let mut nv = stored_with(|s| {
            s.update_rate_ms = 2;
            s.sort_order = 9;
            s.fan_on = false;
            s.fan_speed = 40;
            s.network.udp_port = 1;
        });
        let (settings, outcome) = Settings::load(&mut nv).unwrap();
        assert_eq!(outcome, LoadOutcome::Repaired);
        assert_eq!(settings.system.update_rate_ms, 10);
        assert_eq!(settings.system.sort_order, SortOrder::Name);
        assert!(settings.system.fan_on, "non-zero speed forces the fan on");
        assert_eq!(settings.network, NetworkConfig::default());
    }

    #[test]
    fn test_graph_checksum_mismatch_resets_graph_only() {
        let mut nv = stored_with(|s| {
            s.graph_checksum = s.graph_checksum.wrapping_add(1);
            s.dark_mode = false;
        });
        let (settings, outcome) = Settings::load(&mut nv).unwrap();
        assert_eq!(outcome, LoadOutcome::Repaired);
        assert_eq!(settings.graph, GraphSettings::default());
        assert!(!settings.system.dark_mode, "system block kept");
    }

    #[test]
    fn test_fan_speed_request() {
        let mut system = SystemSettings::default();
        assert_eq!(system.set_fan_speed(300), 255);
        assert_eq!(system.set_fan_speed(0), 0);
        assert!(!system.fan_on);
        assert_eq!(system.set_update_rate(99_999), 5000);
    }
}
