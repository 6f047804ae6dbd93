//! Logging setup for binaries.
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to the process that embeds ccflow.

mod logging;

pub use logging::{filter_directive, init_logging, LogFormat, LogLevel};
