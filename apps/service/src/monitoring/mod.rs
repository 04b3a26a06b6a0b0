/// Monitoring engine module - schedules and evaluates checks
///
/// This module is responsible for:
/// - Evaluating reachability, certificate and delivery-probe checks
/// - Keeping one periodic timer per active monitor
/// - Running each firing through persistence, alerting and the status cache
/// - Validating monitors before they are scheduled
pub mod checker;
pub mod executor;
pub mod pipeline;
pub mod scheduler;
pub mod timers;
pub mod types;
pub mod validation;

pub use executor::MonitoringExecutor;
pub use scheduler::{Scheduler, SchedulerError};
pub use types::{CheckOutcome, CheckState, ProbeResult};
