//! Hardware-independent core library for the six-channel power distribution box
//!
//! This crate contains the real-time control and data plane: the cooperative
//! scheduler, the sensor sampler, the output arbiter, the script engine, the
//! session recorder, the strip-chart engine, settings persistence and the
//! command mux. Every piece of hardware sits behind an `embedded-hal` trait or
//! one of the small traits in [`board`].
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on the panel MCU
//! and on desktop hosts (for the simulator and tests).

#![no_std]

extern crate alloc;

pub mod app;
pub mod arbiter;
pub mod board;
pub mod config;
pub mod graph;
pub mod net;
pub mod recorder;
pub mod scheduler;
pub mod script;
pub mod sensors;
pub mod settings;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod status;
pub mod storage;
pub mod time;

pub use app::{App, AppError};
pub use board::Board;
