//! Script plans and their JSON file form.

use alloc::string::String;
use alloc::vec::Vec;

use log::warn;
use serde::{Deserialize, Serialize};

use super::ScriptError;
use crate::arbiter::ChannelId;
use crate::config::{CHANNEL_COUNT, SCRIPT_NAME_MAX};

/// Epoch used when a script file carries no `lastUsed` (2000-01-01).
pub const DEFAULT_LAST_USED: u64 = 946_684_800;

pub type ScriptName = heapless::String<SCRIPT_NAME_MAX>;

/// On/off times for one channel, in script seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelTiming {
    pub enabled: bool,
    pub on_time: i32,
    pub off_time: i32,
}

impl Default for ChannelTiming {
    fn default() -> Self {
        Self {
            enabled: false,
            on_time: 0,
            off_time: 10,
        }
    }
}

/// Script file as stored under `/scripts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ScriptFile {
    name: String,
    use_record: bool,
    t_start: i32,
    t_end: i32,
    date_created: u64,
    last_used: u64,
    devices: Vec<ChannelTiming>,
}

impl Default for ScriptFile {
    fn default() -> Self {
        Self {
            name: String::new(),
            use_record: true,
            t_start: 0,
            t_end: 120,
            date_created: DEFAULT_LAST_USED,
            last_used: DEFAULT_LAST_USED,
            devices: Vec::new(),
        }
    }
}

/// A validated timed plan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptPlan {
    pub name: ScriptName,
    pub t_start: i32,
    pub t_end: i32,
    pub use_record: bool,
    pub channels: [ChannelTiming; CHANNEL_COUNT],
    pub date_created: u64,
    pub last_used: u64,
}

/// Clip a name to the plan name limit on a character boundary.
pub fn clip_name(name: &str) -> ScriptName {
    let mut out = ScriptName::new();
    for c in name.trim().chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

impl ScriptPlan {
    /// An empty plan with the file defaults.
    pub fn new(name: &str) -> Self {
        Self {
            name: clip_name(name),
            t_start: 0,
            t_end: 120,
            use_record: true,
            channels: [ChannelTiming::default(); CHANNEL_COUNT],
            date_created: DEFAULT_LAST_USED,
            last_used: DEFAULT_LAST_USED,
        }
    }

    /// Check the timeline. Reversed on/off times only produce a warning.
    pub fn validate(&self) -> Result<(), ScriptError> {
        if self.t_end <= self.t_start {
            return Err(ScriptError::InvalidTimeline {
                t_start: self.t_start,
                t_end: self.t_end,
            });
        }
        for ch in ChannelId::ALL {
            let timing = &self.channels[ch.index()];
            if timing.enabled && timing.on_time > timing.off_time {
                warn!(
                    "Script '{}': {} turns on at {} after its off time {}",
                    self.name, ch, timing.on_time, timing.off_time
                );
            }
        }
        Ok(())
    }

    pub fn timing(&self, ch: ChannelId) -> &ChannelTiming {
        &self.channels[ch.index()]
    }

    /// Parse and validate a script file.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ScriptError> {
        let file: ScriptFile =
            serde_json::from_slice(bytes).map_err(|_| ScriptError::Malformed)?;
        if file.devices.len() > CHANNEL_COUNT {
            return Err(ScriptError::Malformed);
        }

        let mut channels = [ChannelTiming::default(); CHANNEL_COUNT];
        for (slot, timing) in channels.iter_mut().zip(file.devices) {
            *slot = timing;
        }

        let plan = Self {
            name: clip_name(&file.name),
            t_start: file.t_start,
            t_end: file.t_end,
            use_record: file.use_record,
            channels,
            date_created: file.date_created,
            last_used: file.last_used,
        };
        plan.validate()?;
        Ok(plan)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, ScriptError> {
        let file = ScriptFile {
            name: String::from(self.name.as_str()),
            use_record: self.use_record,
            t_start: self.t_start,
            t_end: self.t_end,
            date_created: self.date_created,
            last_used: self.last_used,
            devices: self.channels.to_vec(),
        };
        serde_json::to_vec(&file).map_err(|_| ScriptError::Malformed)
    }
}
