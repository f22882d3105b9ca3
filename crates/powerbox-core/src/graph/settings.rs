//! Persisted strip-chart settings.

use serde::{Deserialize, Serialize};

use crate::arbiter::ChannelId;
use crate::config::{
    CHANNEL_COUNT, GRAPH_DEFAULT_TIME_RANGE_S, GRAPH_MAX_POINTS, GRAPH_MAX_TIME_RANGE_S,
    GRAPH_MIN_POINTS, GRAPH_MIN_TIME_RANGE_S, GRAPH_REFRESH_DEFAULT_MS, GRAPH_REFRESH_MAX_MS,
    GRAPH_REFRESH_MIN_MS, GRAPH_TRACE_COLORS,
};

/// Which measurement a trace shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Series {
    /// Amps.
    #[default]
    Current,
    /// Volts.
    Voltage,
    /// Watts.
    Power,
}

impl Series {
    pub const ALL: [Series; 3] = [Series::Current, Series::Voltage, Series::Power];

    pub const fn index(self) -> usize {
        match self {
            Self::Current => 0,
            Self::Voltage => 1,
            Self::Power => 2,
        }
    }

    pub const fn unit(self) -> &'static str {
        match self {
            Self::Current => "A",
            Self::Voltage => "V",
            Self::Power => "W",
        }
    }
}

/// Graph tab: every channel overlaid, or one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tab {
    #[default]
    All,
    Channel(ChannelId),
}

/// Y-axis range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f32,
    pub max: f32,
}

impl Bounds {
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.max > self.min
    }

    /// Force `max > min`.
    pub fn normalized(self) -> Self {
        if self.max > self.min {
            self
        } else {
            Self::new(self.min, self.min + 1.0)
        }
    }
}

/// Manual ranges per series, indexed by [`Series::index`].
pub type SeriesBounds = [Bounds; 3];

/// GSE lines carry less current than the test-equipment lines.
const fn default_bounds(ch: usize) -> SeriesBounds {
    let current_max = if ch < 2 { 2.0 } else { 3.6 };
    [
        Bounds::new(-0.01, current_max),
        Bounds::new(-3.0, 34.0),
        Bounds::new(-1.0, 50.0),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelGraph {
    pub series: Series,
    pub color: u16,
    pub bounds: SeriesBounds,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AllTabGraph {
    pub series: Series,
    pub visible: [bool; CHANNEL_COUNT],
    pub bounds: SeriesBounds,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GraphSettings {
    pub channels: [ChannelGraph; CHANNEL_COUNT],
    pub all: AllTabGraph,
    pub time_range_s: f32,
    pub capacity: u16,
    pub refresh_ms: u16,
    pub line_thickness: u8,
    pub show_grid: bool,
    pub auto_fit: bool,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            channels: core::array::from_fn(|i| ChannelGraph {
                series: Series::Current,
                color: GRAPH_TRACE_COLORS[i],
                bounds: default_bounds(i),
            }),
            all: AllTabGraph {
                series: Series::Current,
                visible: [true; CHANNEL_COUNT],
                bounds: default_bounds(CHANNEL_COUNT - 1),
            },
            time_range_s: GRAPH_DEFAULT_TIME_RANGE_S,
            capacity: GRAPH_MAX_POINTS,
            refresh_ms: GRAPH_REFRESH_DEFAULT_MS as u16,
            line_thickness: 1,
            show_grid: true,
            auto_fit: true,
        }
    }
}

impl GraphSettings {
    pub fn is_valid(&self) -> bool {
        let time_ok = self.time_range_s >= GRAPH_MIN_TIME_RANGE_S
            && self.time_range_s <= GRAPH_MAX_TIME_RANGE_S;
        let capacity_ok = (GRAPH_MIN_POINTS..=GRAPH_MAX_POINTS).contains(&self.capacity);
        let refresh_ok = (GRAPH_REFRESH_MIN_MS..=GRAPH_REFRESH_MAX_MS)
            .contains(&(self.refresh_ms as u64));
        let thickness_ok = (1..=3).contains(&self.line_thickness);
        let bounds_ok = self
            .channels
            .iter()
            .flat_map(|c| c.bounds.iter())
            .chain(self.all.bounds.iter())
            .all(Bounds::is_valid);
        time_ok && capacity_ok && refresh_ok && thickness_ok && bounds_ok
    }

    pub fn series_for(&self, tab: Tab) -> Series {
        match tab {
            Tab::All => self.all.series,
            Tab::Channel(ch) => self.channels[ch.index()].series,
        }
    }

    pub fn bounds_for(&self, tab: Tab, series: Series) -> Bounds {
        match tab {
            Tab::All => self.all.bounds[series.index()],
            Tab::Channel(ch) => self.channels[ch.index()].bounds[series.index()],
        }
    }

    /// Byte sum of the encoded block.
    pub fn checksum(&self) -> u32 {
        postcard::to_allocvec(self)
            .map(|bytes| bytes.iter().fold(0u32, |sum, &b| sum.wrapping_add(b as u32)))
            .unwrap_or(0)
    }
}
