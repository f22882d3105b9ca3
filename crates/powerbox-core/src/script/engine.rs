//! Timed plan execution over a signed script clock.

use core::fmt::Write;

use embedded_hal::digital::{InputPin, OutputPin};
use log::{info, warn};

use super::{ScriptError, ScriptPlan};
use crate::arbiter::{Arbiter, ChannelId};
use crate::config::CHANNEL_COUNT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Paused,
}

/// Reported when a run ends, for closing a script-owned recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunEnd {
    pub ended_early: bool,
    pub last_sec: i32,
}

/// Text for the script clock, e.g. `T-5` or `T+12`.
pub type ClockLabel = heapless::String<16>;

pub fn format_script_clock(sec: i32) -> ClockLabel {
    let mut out = ClockLabel::new();
    // 16 bytes fit "T-2147483648"
    let _ = if sec < 0 {
        write!(out, "T-{}", sec.unsigned_abs())
    } else {
        write!(out, "T+{}", sec)
    };
    out
}

pub struct ScriptEngine {
    plan: Option<ScriptPlan>,
    state: RunState,
    run_start: u64,
    paused_accum: u64,
    pause_entered: u64,
    ended_early: bool,
    pre_script_locked: bool,
    on_triggered: [bool; CHANNEL_COUNT],
    off_triggered: [bool; CHANNEL_COUNT],
    last_sec: i32,
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptEngine {
    pub const fn new() -> Self {
        Self {
            plan: None,
            state: RunState::Idle,
            run_start: 0,
            paused_accum: 0,
            pause_entered: 0,
            ended_early: false,
            pre_script_locked: false,
            on_triggered: [false; CHANNEL_COUNT],
            off_triggered: [false; CHANNEL_COUNT],
            last_sec: 0,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Running or paused.
    pub fn is_active(&self) -> bool {
        self.state != RunState::Idle
    }

    pub fn is_paused(&self) -> bool {
        self.state == RunState::Paused
    }

    pub fn plan(&self) -> Option<&ScriptPlan> {
        self.plan.as_ref()
    }

    pub fn plan_mut(&mut self) -> Option<&mut ScriptPlan> {
        self.plan.as_mut()
    }

    pub fn ended_early(&self) -> bool {
        self.ended_early
    }

    pub fn on_triggered(&self, ch: ChannelId) -> bool {
        self.on_triggered[ch.index()]
    }

    pub fn off_triggered(&self, ch: ChannelId) -> bool {
        self.off_triggered[ch.index()]
    }

    /// Replace the loaded plan. Refused while a run is active.
    pub fn load(&mut self, plan: ScriptPlan) -> Result<(), ScriptError> {
        if self.is_active() {
            return Err(ScriptError::NotIdle);
        }
        info!("Loaded script '{}'", plan.name);
        self.plan = Some(plan);
        Ok(())
    }

    fn clear_triggers(&mut self) {
        self.on_triggered = [false; CHANNEL_COUNT];
        self.off_triggered = [false; CHANNEL_COUNT];
    }

    /// Start the loaded plan: outputs off, panel locked, script owns outputs.
    ///
    /// Returns the plan's `use_record` flag.
    pub fn start<O: OutputPin, S: InputPin>(
        &mut self,
        now_ms: u64,
        arbiter: &mut Arbiter<O, S>,
    ) -> Result<bool, ScriptError> {
        if self.is_active() {
            return Err(ScriptError::NotIdle);
        }
        if arbiter.safety_stop() {
            return Err(ScriptError::SafetyStop);
        }
        let Some(plan) = self.plan.as_ref() else {
            return Err(ScriptError::NoPlan);
        };
        let use_record = plan.use_record;
        let t_start = plan.t_start;
        info!("Starting script '{}' at {}", plan.name, format_script_clock(t_start));

        self.pre_script_locked = arbiter.locked();
        arbiter.claim_for_script();
        self.clear_triggers();
        self.run_start = now_ms;
        self.paused_accum = 0;
        self.ended_early = false;
        self.last_sec = t_start;
        self.state = RunState::Running;
        Ok(use_record)
    }

    pub fn pause(&mut self, now_ms: u64) -> Result<(), ScriptError> {
        if self.state != RunState::Running {
            return Err(ScriptError::NotRunning);
        }
        self.pause_entered = now_ms;
        self.state = RunState::Paused;
        info!("Script paused at {}", format_script_clock(self.last_sec));
        Ok(())
    }

    pub fn resume(&mut self, now_ms: u64) -> Result<(), ScriptError> {
        if self.state != RunState::Paused {
            return Err(ScriptError::NotPaused);
        }
        self.paused_accum += now_ms.saturating_sub(self.pause_entered);
        self.state = RunState::Running;
        info!("Script resumed");
        Ok(())
    }

    /// End the run and hand the outputs back to manual control.
    pub fn stop<O: OutputPin, S: InputPin>(
        &mut self,
        user_ended: bool,
        arbiter: &mut Arbiter<O, S>,
    ) -> Result<RunEnd, ScriptError> {
        if !self.is_active() {
            return Err(ScriptError::NotRunning);
        }
        self.ended_early = user_ended;
        self.clear_triggers();
        self.state = RunState::Idle;
        arbiter.release_from_script(self.pre_script_locked);
        if !arbiter.safety_stop() {
            arbiter.follow_switches();
        }
        if user_ended {
            warn!("Script ended early at {}", format_script_clock(self.last_sec));
        } else {
            info!("Script complete at {}", format_script_clock(self.last_sec));
        }
        Ok(RunEnd {
            ended_early: user_ended,
            last_sec: self.last_sec,
        })
    }

    fn elapsed_ms(&self, now_ms: u64) -> u64 {
        let frozen = match self.state {
            RunState::Paused => now_ms.saturating_sub(self.pause_entered),
            _ => 0,
        };
        now_ms
            .saturating_sub(self.run_start)
            .saturating_sub(self.paused_accum)
            .saturating_sub(frozen)
    }

    /// Script seconds, rounded to the nearest second. `None` when idle.
    pub fn script_seconds(&self, now_ms: u64) -> Option<i32> {
        let plan = self.plan.as_ref().filter(|_| self.is_active())?;
        let rounded = (self.elapsed_ms(now_ms) + 500) / 1000;
        Some(plan.t_start.saturating_add(rounded.min(i32::MAX as u64) as i32))
    }

    /// Unrounded script time for the graph axis.
    pub fn script_time(&self, now_ms: u64) -> Option<f32> {
        let plan = self.plan.as_ref().filter(|_| self.is_active())?;
        Some(plan.t_start as f32 + self.elapsed_ms(now_ms) as f32 / 1000.0)
    }

    /// Advance the timeline. Returns the run end when the plan reaches `t_end`.
    pub fn tick<O: OutputPin, S: InputPin>(
        &mut self,
        now_ms: u64,
        arbiter: &mut Arbiter<O, S>,
    ) -> Option<RunEnd> {
        if self.state != RunState::Running {
            return None;
        }
        let sec = self.script_seconds(now_ms)?;
        self.last_sec = sec;
        if sec >= self.plan.as_ref()?.t_end {
            return self.stop(false, arbiter).ok();
        }

        let plan = self.plan.as_ref()?;
        for ch in ChannelId::ALL {
            let timing = plan.timing(ch);
            if !timing.enabled {
                continue;
            }
            let i = ch.index();
            if sec >= timing.on_time && !self.on_triggered[i] && !arbiter.is_on(ch) {
                if arbiter.script_drive(ch, true).is_ok() {
                    info!("{} {} ON", format_script_clock(sec), ch);
                }
                self.on_triggered[i] = true;
            }
            if sec >= timing.off_time && !self.off_triggered[i] && arbiter.is_on(ch) {
                if arbiter.script_drive(ch, false).is_ok() {
                    info!("{} {} OFF", format_script_clock(sec), ch);
                }
                self.off_triggered[i] = true;
            }
        }
        None
    }
}
