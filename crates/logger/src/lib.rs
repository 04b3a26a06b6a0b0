//! Shared `tracing` setup for the Vigil binaries.

mod subscriber;

pub use subscriber::{LogFormat, LoggingConfig, init_with};
