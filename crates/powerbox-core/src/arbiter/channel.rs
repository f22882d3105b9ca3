//! Channel identities and name lookup.

use core::fmt;

use crate::config::{CHANNEL_COUNT, CHANNEL_NAMES, SENSOR_NAMES};

/// One of the six switched outputs, in switch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u8);

/// Short operator spellings accepted on the command line.
const ALIASES: [(&str, usize); CHANNEL_COUNT] = [
    ("gse1", 0),
    ("gse2", 1),
    ("ter", 2),
    ("te1", 3),
    ("te2", 4),
    ("te3", 5),
];

impl ChannelId {
    pub const ALL: [ChannelId; CHANNEL_COUNT] = [
        ChannelId(0),
        ChannelId(1),
        ChannelId(2),
        ChannelId(3),
        ChannelId(4),
        ChannelId(5),
    ];

    pub const fn new(index: usize) -> Option<Self> {
        if index < CHANNEL_COUNT {
            Some(Self(index as u8))
        } else {
            None
        }
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub const fn name(self) -> &'static str {
        CHANNEL_NAMES[self.0 as usize]
    }

    /// Index of the sensor monitoring this channel, matched by name.
    pub fn sensor_index(self) -> Option<usize> {
        SENSOR_NAMES
            .iter()
            .position(|sensor| sensor.eq_ignore_ascii_case(self.name()))
    }

    /// Resolve an operator-supplied device name.
    ///
    /// Matching ignores case and accepts the short aliases (`gse1`, `ter`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        if let Some(&(_, index)) = ALIASES
            .iter()
            .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
        {
            return Self::new(index);
        }
        CHANNEL_NAMES
            .iter()
            .position(|candidate| candidate.eq_ignore_ascii_case(name))
            .and_then(Self::new)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
