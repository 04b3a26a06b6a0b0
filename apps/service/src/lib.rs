//! Vigil monitoring engine.
//!
//! Periodically evaluates registered monitors, records each check, opens and
//! resolves alerts, fans notifications out to an organization's channels and
//! keeps a short-lived cache of the latest status per monitor.

pub mod alerting;
pub mod cache;
pub mod config;
pub mod database;
pub mod monitoring;
pub mod notifications;
pub mod pool;

#[cfg(test)]
pub(crate) mod testing;

pub use monitoring::{Scheduler, SchedulerError};
