//! Timekeep Infrastructure Library
//!
//! Process-level plumbing shared by the timekeep binaries. Currently the
//! tracing subscriber setup.

pub mod telemetry;

pub use telemetry::{init_telemetry, shutdown_telemetry};
