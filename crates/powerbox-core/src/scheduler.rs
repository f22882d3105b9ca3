//! Cooperative deadline scheduler
//!
//! A fixed table of periodic tasks is polled from one loop. Each task fires at
//! most once per poll; when a task is found late its next deadline is
//! realigned to the current time, so a stall never produces a burst of
//! catch-up firings.

use crate::config::{
    CLOCK_TICK_PERIOD_MS, DISPLAY_REDRAW_PERIOD_MS, GRAPH_REFRESH_DEFAULT_MS, GRAPH_REFRESH_MAX_MS,
    GRAPH_REFRESH_MIN_MS, HEARTBEAT_PERIOD_MS, NETWORK_HEALTH_PERIOD_MS, RECORD_WRITE_PERIOD_MS,
    SD_POLL_PERIOD_MS, SENSOR_SAMPLE_PERIOD_MS,
};

/// Periodic tasks driven by the main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    SensorSample,
    RecordWrite,
    GraphRefresh,
    DisplayRedraw,
    ClockTick,
    SdPoll,
    NetworkHealth,
    Heartbeat,
}

impl Task {
    pub const ALL: [Task; 8] = [
        Task::SensorSample,
        Task::RecordWrite,
        Task::GraphRefresh,
        Task::DisplayRedraw,
        Task::ClockTick,
        Task::SdPoll,
        Task::NetworkHealth,
        Task::Heartbeat,
    ];

    const fn index(self) -> usize {
        match self {
            Self::SensorSample => 0,
            Self::RecordWrite => 1,
            Self::GraphRefresh => 2,
            Self::DisplayRedraw => 3,
            Self::ClockTick => 4,
            Self::SdPoll => 5,
            Self::NetworkHealth => 6,
            Self::Heartbeat => 7,
        }
    }

    /// Nominal period in milliseconds.
    pub const fn default_period_ms(self) -> u64 {
        match self {
            Self::SensorSample => SENSOR_SAMPLE_PERIOD_MS,
            Self::RecordWrite => RECORD_WRITE_PERIOD_MS,
            Self::GraphRefresh => GRAPH_REFRESH_DEFAULT_MS,
            Self::DisplayRedraw => DISPLAY_REDRAW_PERIOD_MS,
            Self::ClockTick => CLOCK_TICK_PERIOD_MS,
            Self::SdPoll => SD_POLL_PERIOD_MS,
            Self::NetworkHealth => NETWORK_HEALTH_PERIOD_MS,
            Self::Heartbeat => HEARTBEAT_PERIOD_MS,
        }
    }
}

/// Clamp a requested graph refresh period into the supported window.
///
/// Zero and anything under 20 ms become 20 ms.
pub const fn clamp_refresh_ms(requested: u64) -> u64 {
    if requested < GRAPH_REFRESH_MIN_MS {
        GRAPH_REFRESH_MIN_MS
    } else if requested > GRAPH_REFRESH_MAX_MS {
        GRAPH_REFRESH_MAX_MS
    } else {
        requested
    }
}

/// A single periodic deadline.
#[derive(Debug, Clone, Copy)]
pub struct Periodic {
    period_ms: u64,
    next_due_ms: u64,
}

impl Periodic {
    /// First firing happens one period after `now_ms`.
    pub const fn new(period_ms: u64, now_ms: u64) -> Self {
        Self {
            period_ms,
            next_due_ms: now_ms + period_ms,
        }
    }

    pub const fn period_ms(&self) -> u64 {
        self.period_ms
    }

    pub fn set_period(&mut self, period_ms: u64, now_ms: u64) {
        self.period_ms = period_ms;
        self.next_due_ms = now_ms + period_ms;
    }

    /// Returns `true` if the deadline has passed, and rearms it relative to
    /// `now_ms`.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        if now_ms >= self.next_due_ms {
            self.next_due_ms = now_ms + self.period_ms;
            true
        } else {
            false
        }
    }
}

/// The fixed task table.
#[derive(Debug, Clone)]
pub struct Scheduler {
    tasks: [Periodic; 8],
}

impl Scheduler {
    pub fn new(now_ms: u64) -> Self {
        Self {
            tasks: Task::ALL.map(|task| Periodic::new(task.default_period_ms(), now_ms)),
        }
    }

    /// Poll one task. Call sites sit at the task's slot in the loop order, so
    /// every task is checked once per iteration.
    pub fn due(&mut self, task: Task, now_ms: u64) -> bool {
        self.tasks[task.index()].poll(now_ms)
    }

    pub fn period_ms(&self, task: Task) -> u64 {
        self.tasks[task.index()].period_ms()
    }

    /// Change the graph refresh period; out-of-range requests are clamped.
    pub fn set_graph_refresh_ms(&mut self, requested: u64, now_ms: u64) -> u64 {
        let period = clamp_refresh_ms(requested);
        self.tasks[Task::GraphRefresh.index()].set_period(period, now_ms);
        period
    }
}
