//! Rocker switch debouncing.
//!
//! Switches are wired active-low with pull-ups: a closed rocker reads low and
//! means ON. A level has to hold for the debounce window before it becomes the
//! stable state and produces an edge.

use crate::config::SWITCH_DEBOUNCE_MS;

/// A debounced transition of a rocker switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchEdge {
    /// Line fell to low: the rocker was switched ON.
    Falling,
    /// Line rose to high: the rocker was switched OFF.
    Rising,
}

#[derive(Debug, Clone, Copy)]
pub struct Debouncer {
    stable_low: bool,
    candidate_low: bool,
    candidate_since: u64,
}

impl Debouncer {
    /// Start with a known stable level, read at boot.
    pub const fn new(initial_low: bool) -> Self {
        Self {
            stable_low: initial_low,
            candidate_low: initial_low,
            candidate_since: 0,
        }
    }

    pub const fn is_low(&self) -> bool {
        self.stable_low
    }

    /// Feed the raw level; returns an edge once a new level has been stable for
    /// the debounce window.
    pub fn update(&mut self, raw_low: bool, now_ms: u64) -> Option<SwitchEdge> {
        if raw_low != self.candidate_low {
            self.candidate_low = raw_low;
            self.candidate_since = now_ms;
            return None;
        }

        if self.candidate_low != self.stable_low
            && now_ms.saturating_sub(self.candidate_since) >= SWITCH_DEBOUNCE_MS
        {
            self.stable_low = self.candidate_low;
            return Some(if self.stable_low {
                SwitchEdge::Falling
            } else {
                SwitchEdge::Rising
            });
        }
        None
    }
}
