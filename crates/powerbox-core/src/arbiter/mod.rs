//! Output arbitration
//!
//! The [`Arbiter`] is the only writer of the six output lines. Every intent
//! (touch, keypad, serial, network, rocker switch, script) goes through it and
//! is checked against the system mode:
//!
//! - **safety stop** latches every output off and overrides everything else;
//! - **script owned** lets only the script engine drive outputs;
//! - **locked** rejects manual overrides and rocker edges.
//!
//! When manual control comes back (unlock, safety release) the outputs are
//! resynchronised to the rocker positions with [`Arbiter::follow_switches`].

mod channel;
mod switches;

pub use channel::ChannelId;
pub use switches::{Debouncer, SwitchEdge};

use core::fmt;

use embedded_hal::digital::{InputPin, OutputPin};
use log::{debug, error, info, warn};
use thiserror_no_std::Error;

use crate::config::CHANNEL_COUNT;

/// Why an intent was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    Locked,
    SafetyStop,
    ScriptRunning,
}

impl DenyReason {
    /// Wire spelling used in command responses.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::SafetyStop => "safety_stop",
            Self::ScriptRunning => "script_running",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterError {
    #[error("denied: {0}")]
    Denied(DenyReason),
    #[error("unknown device")]
    UnknownChannel,
    #[error("output line for {0} did not accept the write")]
    Line(ChannelId),
}

/// Who currently has authority over the outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owner {
    Manual,
    Script,
}

struct Line<O, S> {
    output: O,
    switch: Option<S>,
    debouncer: Debouncer,
    on: bool,
}

pub struct Arbiter<O, S>
where
    O: OutputPin,
    S: InputPin,
{
    lines: [Line<O, S>; CHANNEL_COUNT],
    locked: bool,
    safety_stop: bool,
    pre_stop_locked: bool,
    owner: Owner,
}

impl<O, S> Arbiter<O, S>
where
    O: OutputPin,
    S: InputPin,
{
    /// Take ownership of the output and switch lines and drive every output
    /// to its rocker position.
    pub fn new(outputs: [O; CHANNEL_COUNT], switches: [Option<S>; CHANNEL_COUNT]) -> Self {
        let mut switches = switches.into_iter();
        let lines = outputs.map(|output| Line {
            output,
            switch: switches.next().flatten(),
            debouncer: Debouncer::new(false),
            on: false,
        });

        let mut arbiter = Self {
            lines,
            locked: false,
            safety_stop: false,
            pre_stop_locked: false,
            owner: Owner::Manual,
        };

        for ch in ChannelId::ALL {
            let line = &mut arbiter.lines[ch.index()];
            let low = match line.switch.as_mut() {
                Some(switch) => switch.is_low().unwrap_or(false),
                None => false,
            };
            line.debouncer = Debouncer::new(low);
            if let Err(e) = arbiter.drive(ch, low) {
                error!("Boot sync: {}", e);
            }
        }
        arbiter
    }

    pub fn locked(&self) -> bool {
        self.locked
    }

    pub fn safety_stop(&self) -> bool {
        self.safety_stop
    }

    pub fn pre_stop_locked(&self) -> bool {
        self.pre_stop_locked
    }

    pub fn script_owned(&self) -> bool {
        self.owner == Owner::Script
    }

    pub fn is_on(&self, ch: ChannelId) -> bool {
        self.lines[ch.index()].on
    }

    /// Commanded state of every channel, in channel order.
    pub fn states(&self) -> [bool; CHANNEL_COUNT] {
        core::array::from_fn(|i| self.lines[i].on)
    }

    /// Checks the manual-control precondition.
    pub fn permit_manual(&self) -> Result<(), ArbiterError> {
        if self.safety_stop {
            Err(ArbiterError::Denied(DenyReason::SafetyStop))
        } else if self.owner == Owner::Script {
            Err(ArbiterError::Denied(DenyReason::ScriptRunning))
        } else if self.locked {
            Err(ArbiterError::Denied(DenyReason::Locked))
        } else {
            Ok(())
        }
    }

    /// Write one output line and record the commanded state.
    ///
    /// The recorded state only changes when the line accepted the write.
    fn drive(&mut self, ch: ChannelId, on: bool) -> Result<(), ArbiterError> {
        let line = &mut self.lines[ch.index()];
        let result = if on {
            line.output.set_high()
        } else {
            line.output.set_low()
        };
        match result {
            Ok(()) => {
                line.on = on;
                Ok(())
            }
            Err(e) => {
                error!("Output {} write failed: {:?}", ch, e);
                Err(ArbiterError::Line(ch))
            }
        }
    }

    /// Manual override of a single output.
    pub fn set_output(&mut self, ch: ChannelId, on: bool) -> Result<(), ArbiterError> {
        self.permit_manual()?;
        debug!("{} -> {}", ch, if on { "ON" } else { "OFF" });
        self.drive(ch, on)
    }

    /// Lock the panel and switch every output on.
    pub fn all_on(&mut self) -> Result<(), ArbiterError> {
        self.permit_manual()?;
        self.locked = true;
        info!("All outputs ON (panel locked)");
        self.drive_all(true)
    }

    /// Lock the panel and switch every output off.
    pub fn all_off(&mut self) -> Result<(), ArbiterError> {
        self.permit_manual()?;
        self.locked = true;
        info!("All outputs OFF (panel locked)");
        self.drive_all(false)
    }

    fn drive_all(&mut self, on: bool) -> Result<(), ArbiterError> {
        let mut result = Ok(());
        for ch in ChannelId::ALL {
            if let Err(e) = self.drive(ch, on) {
                result = Err(e);
            }
        }
        result
    }

    /// Force every output off regardless of mode. Used on safety stop and
    /// script start.
    pub(crate) fn force_all_off(&mut self) {
        // drive() already logs the failing line
        let _ = self.drive_all(false);
    }

    /// Latch the safety stop. Returns `false` if it was already engaged.
    ///
    /// Aborting the script and the recording is done by the caller, which owns
    /// those components.
    pub fn engage_safety_stop(&mut self) -> bool {
        if self.safety_stop {
            return false;
        }
        self.pre_stop_locked = self.locked;
        self.safety_stop = true;
        self.force_all_off();
        warn!("SAFETY STOP engaged");
        true
    }

    /// Release the safety stop and restore the lock it found. Returns `false`
    /// if no stop was engaged.
    pub fn release_safety_stop(&mut self) -> bool {
        if !self.safety_stop {
            return false;
        }
        self.safety_stop = false;
        let was_locked = self.locked;
        self.locked = self.pre_stop_locked;
        info!("Safety stop released (locked = {})", self.locked);
        if was_locked && !self.locked {
            self.follow_switches();
        }
        true
    }

    /// Change the lock. Refused while a script owns the outputs.
    pub fn set_lock(&mut self, locked: bool) -> Result<(), ArbiterError> {
        if self.owner == Owner::Script {
            return Err(ArbiterError::Denied(DenyReason::ScriptRunning));
        }
        let was_locked = self.locked;
        self.locked = locked;
        if was_locked && !locked {
            self.follow_switches();
        }
        Ok(())
    }

    pub fn toggle_lock(&mut self) -> Result<(), ArbiterError> {
        self.set_lock(!self.locked)
    }

    /// Drive every switched output to match its rocker. Does nothing while the
    /// safety stop is latched.
    pub fn follow_switches(&mut self) {
        if self.safety_stop {
            return;
        }
        for ch in ChannelId::ALL {
            let line = &mut self.lines[ch.index()];
            let Some(switch) = line.switch.as_mut() else {
                continue;
            };
            let closed = match switch.is_low() {
                Ok(low) => low,
                Err(e) => {
                    warn!("Switch {} unreadable: {:?}", ch, e);
                    continue;
                }
            };
            if closed != line.on {
                // drive() logs failures; the next resync retries
                let _ = self.drive(ch, closed);
            }
        }
    }

    /// Sample every rocker and apply debounced edges when manual control is
    /// permitted. Edges seen while locked, stopped or scripted are dropped.
    pub fn scan_switches(&mut self, now_ms: u64) {
        let permitted = self.permit_manual().is_ok();
        for ch in ChannelId::ALL {
            let line = &mut self.lines[ch.index()];
            let Some(switch) = line.switch.as_mut() else {
                continue;
            };
            let Ok(low) = switch.is_low() else {
                continue;
            };
            let Some(edge) = line.debouncer.update(low, now_ms) else {
                continue;
            };
            if !permitted {
                debug!("Ignoring {:?} on {}", edge, ch);
                continue;
            }
            let on = edge == SwitchEdge::Falling;
            // drive() logs failures
            let _ = self.drive(ch, on);
        }
    }

    /// Hand the outputs to the script engine: all off, locked.
    pub(crate) fn claim_for_script(&mut self) {
        self.force_all_off();
        self.locked = true;
        self.owner = Owner::Script;
    }

    /// Return the outputs to manual control with the given lock state.
    pub(crate) fn release_from_script(&mut self, restore_locked: bool) {
        self.owner = Owner::Manual;
        self.locked = restore_locked;
    }

    /// Script-originated write. Only the safety stop can refuse it.
    pub(crate) fn script_drive(&mut self, ch: ChannelId, on: bool) -> Result<(), ArbiterError> {
        if self.safety_stop {
            return Err(ArbiterError::Denied(DenyReason::SafetyStop));
        }
        self.drive(ch, on)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimPin, SimSwitch};

    fn arbiter() -> (Arbiter<SimPin, SimSwitch>, [SimPin; 6], [SimSwitch; 6]) {
        let pins: [SimPin; 6] = core::array::from_fn(|_| SimPin::new());
        let switches: [SimSwitch; 6] = core::array::from_fn(|_| SimSwitch::new(false));
        let arb = Arbiter::new(pins.clone(), switches.clone().map(Some));
        (arb, pins, switches)
    }

    fn ch(i: usize) -> ChannelId {
        ChannelId::new(i).unwrap()
    }

    #[test]
    fn test_boot_follows_switches() {
        let pins: [SimPin; 6] = core::array::from_fn(|_| SimPin::new());
        let switches: [SimSwitch; 6] = core::array::from_fn(|i| SimSwitch::new(i == 1));
        let arb = Arbiter::new(pins.clone(), switches.map(Some));
        assert!(arb.is_on(ch(1)));
        assert!(pins[1].is_high());
        assert!(!arb.is_on(ch(0)));
    }

    #[test]
    fn test_set_output_denied_when_locked() {
        let (mut arb, pins, _) = arbiter();
        arb.set_lock(true).unwrap();
        assert_eq!(
            arb.set_output(ch(0), true),
            Err(ArbiterError::Denied(DenyReason::Locked))
        );
        assert!(!pins[0].is_high(), "line untouched on denial");
        assert_eq!(arb.states(), [false; 6]);
    }

    #[test]
    fn test_safety_stop_forces_off_and_is_idempotent() {
        let (mut arb, pins, _) = arbiter();
        arb.set_output(ch(0), true).unwrap();
        arb.set_output(ch(3), true).unwrap();

        assert!(arb.engage_safety_stop());
        assert_eq!(arb.states(), [false; 6]);
        assert!(!pins[3].is_high());

        arb.set_lock(true).unwrap();
        assert!(!arb.engage_safety_stop(), "second engage is a no-op");
        assert!(!arb.pre_stop_locked(), "pre-stop lock not overwritten");
    }

    #[test]
    fn test_release_restores_lock() {
        let (mut arb, _, _) = arbiter();
        arb.set_lock(true).unwrap();
        arb.engage_safety_stop();
        arb.set_lock(false).unwrap();
        assert!(arb.release_safety_stop());
        assert!(arb.locked(), "lock equals its pre-stop value");
        assert!(!arb.release_safety_stop());
    }

    #[test]
    fn test_release_into_unlocked_follows_switches() {
        let (mut arb, pins, switches) = arbiter();
        arb.engage_safety_stop();
        switches[2].set_closed(true);
        // The operator locked the panel while stopped
        arb.set_lock(true).unwrap();
        assert!(!pins[2].is_high(), "no resync while stopped");

        arb.release_safety_stop();
        assert!(!arb.locked());
        assert!(arb.is_on(ch(2)), "resynced to the closed rocker");
    }

    #[test]
    fn test_unlock_follows_switches() {
        let (mut arb, _, switches) = arbiter();
        arb.set_lock(true).unwrap();
        switches[4].set_closed(true);
        arb.scan_switches(0);
        arb.scan_switches(20);
        assert!(!arb.is_on(ch(4)), "edge ignored while locked");

        arb.toggle_lock().unwrap();
        assert!(arb.is_on(ch(4)));
    }

    #[test]
    fn test_switch_edges_apply_when_unlocked() {
        let (mut arb, pins, switches) = arbiter();
        switches[0].set_closed(true);
        arb.scan_switches(100);
        arb.scan_switches(110);
        assert!(pins[0].is_high());

        switches[0].set_closed(false);
        arb.scan_switches(200);
        arb.scan_switches(215);
        assert!(!pins[0].is_high());
    }

    #[test]
    fn test_all_on_locks_panel() {
        let (mut arb, _, _) = arbiter();
        arb.all_on().unwrap();
        assert!(arb.locked());
        assert_eq!(arb.states(), [true; 6]);
        assert_eq!(
            arb.all_off(),
            Err(ArbiterError::Denied(DenyReason::Locked))
        );
    }

    #[test]
    fn test_script_ownership() {
        let (mut arb, _, _) = arbiter();
        arb.set_output(ch(1), true).unwrap();
        arb.claim_for_script();
        assert!(arb.locked());
        assert_eq!(arb.states(), [false; 6]);
        assert_eq!(
            arb.set_output(ch(1), true),
            Err(ArbiterError::Denied(DenyReason::ScriptRunning))
        );
        assert_eq!(
            arb.set_lock(false),
            Err(ArbiterError::Denied(DenyReason::ScriptRunning))
        );
        arb.script_drive(ch(1), true).unwrap();
        assert!(arb.is_on(ch(1)));

        arb.engage_safety_stop();
        assert_eq!(
            arb.script_drive(ch(1), true),
            Err(ArbiterError::Denied(DenyReason::SafetyStop))
        );
    }
}
