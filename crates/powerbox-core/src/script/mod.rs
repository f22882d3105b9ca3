//! Timed scripts
//!
//! A script is a plan of per-channel on/off times over a signed timeline
//! (`T-5` ... `T+120`). Plans live as JSON files on the internal card
//! ([`library`]); the [`ScriptEngine`] runs one plan at a time and drives the
//! outputs through the arbiter.

pub mod library;

mod engine;
mod plan;

pub use engine::{ClockLabel, RunEnd, RunState, ScriptEngine, format_script_clock};
pub use library::{ScriptEntry, SortOrder};
pub use plan::{ChannelTiming, DEFAULT_LAST_USED, ScriptName, ScriptPlan, clip_name};

use thiserror_no_std::Error;

use crate::storage::StorageError;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptError {
    #[error("script not found")]
    NotFound,
    #[error("script file is not a valid plan")]
    Malformed,
    #[error("invalid script name")]
    InvalidName,
    #[error("t_end {t_end} must be after t_start {t_start}")]
    InvalidTimeline { t_start: i32, t_end: i32 },
    #[error("no script loaded")]
    NoPlan,
    #[error("a script is already running")]
    NotIdle,
    #[error("no script running")]
    NotRunning,
    #[error("script is not paused")]
    NotPaused,
    #[error("safety stop engaged")]
    SafetyStop,
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
}
