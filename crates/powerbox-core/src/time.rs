//! Time sources and small time helpers
//!
//! The core never reads a hardware timer directly. The board hands it a
//! monotonic millisecond [`Clock`] and a [`WallClock`] backed by the RTC.

use core::fmt::Write;

use heapless::String;

use crate::config::PRESS_FEEDBACK_MS;

/// Monotonic millisecond counter.
pub trait Clock {
    /// Milliseconds since boot. Never goes backwards.
    fn now_ms(&self) -> u64;
}

/// Real-time clock, used for file timestamps and the header clock.
pub trait WallClock {
    /// Seconds since the Unix epoch.
    fn epoch_secs(&self) -> u64;
}

/// Formatted wall-clock text, e.g. `14:03:27` or `2:03:27 PM`.
pub type ClockText = String<12>;

/// Format an epoch timestamp as a time of day.
pub fn format_time_of_day(epoch_secs: u64, use_24h: bool) -> ClockText {
    let day_secs = epoch_secs % 86_400;
    let hour = (day_secs / 3600) as u8;
    let minute = ((day_secs % 3600) / 60) as u8;
    let second = (day_secs % 60) as u8;

    let mut out = ClockText::new();
    // Capacity covers the longest form ("12:59:59 PM"), so writes cannot fail.
    let _ = if use_24h {
        write!(out, "{:02}:{:02}:{:02}", hour, minute, second)
    } else {
        let pm = hour >= 12;
        let h12 = match hour {
            0 => 12,
            h if h > 12 => h - 12,
            h => h,
        };
        write!(
            out,
            "{}:{:02}:{:02} {}",
            h12,
            minute,
            second,
            if pm { "PM" } else { "AM" }
        )
    };
    out
}

/// Session timestamps always use the 24 hour `HH:MM:SS` form.
pub fn format_hms(epoch_secs: u64) -> ClockText {
    format_time_of_day(epoch_secs, true)
}

/// Two-deadline press feedback for touch buttons.
///
/// The button is drawn pressed at `t` and drawn normal again at
/// `t + PRESS_FEEDBACK_MS`. The UI polls [`PressFeedback::poll`] every loop
/// instead of sleeping between the two draws.
#[derive(Debug, Default, Clone, Copy)]
pub struct PressFeedback {
    pressed_at: Option<u64>,
}

/// What the UI should draw for a button with pending feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackLook {
    Pressed,
    Released,
}

impl PressFeedback {
    pub const fn new() -> Self {
        Self { pressed_at: None }
    }

    pub fn press(&mut self, now_ms: u64) {
        self.pressed_at = Some(now_ms);
    }

    pub fn is_active(&self) -> bool {
        self.pressed_at.is_some()
    }

    /// Returns the look to draw, or `None` once the feedback has completed.
    ///
    /// The release look is reported exactly once.
    pub fn poll(&mut self, now_ms: u64) -> Option<FeedbackLook> {
        let pressed_at = self.pressed_at?;
        if now_ms.saturating_sub(pressed_at) >= PRESS_FEEDBACK_MS {
            self.pressed_at = None;
            Some(FeedbackLook::Released)
        } else {
            Some(FeedbackLook::Pressed)
        }
    }
}

/// Debounce gate: accepts an event only if the previous accepted one is at
/// least `window_ms` old.
#[derive(Debug, Clone, Copy)]
pub struct DebounceGate {
    window_ms: u64,
    last_accepted: Option<u64>,
}

impl DebounceGate {
    pub const fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            last_accepted: None,
        }
    }

    pub fn accept(&mut self, now_ms: u64) -> bool {
        match self.last_accepted {
            Some(last) if now_ms.saturating_sub(last) < self.window_ms => false,
            _ => {
                self.last_accepted = Some(now_ms);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_24h() {
        // 1970-01-01 13:05:09
        let t = 13 * 3600 + 5 * 60 + 9;
        assert_eq!(format_time_of_day(t, true).as_str(), "13:05:09");
    }

    #[test]
    fn test_format_12h() {
        assert_eq!(format_time_of_day(0, false).as_str(), "12:00:00 AM");
        assert_eq!(
            format_time_of_day(13 * 3600 + 7, false).as_str(),
            "1:00:07 PM"
        );
        assert_eq!(format_time_of_day(12 * 3600, false).as_str(), "12:00:00 PM");
    }

    #[test]
    fn test_press_feedback_two_deadlines() {
        let mut fb = PressFeedback::new();
        assert_eq!(fb.poll(0), None);

        fb.press(1000);
        assert_eq!(fb.poll(1000), Some(FeedbackLook::Pressed));
        assert_eq!(fb.poll(1079), Some(FeedbackLook::Pressed));
        assert_eq!(fb.poll(1080), Some(FeedbackLook::Released));
        assert_eq!(fb.poll(1081), None, "release is reported once");
    }

    #[test]
    fn test_debounce_gate() {
        let mut gate = DebounceGate::new(200);
        assert!(gate.accept(10));
        assert!(!gate.accept(150));
        assert!(gate.accept(210));
    }
}
