//! Per-monitor periodic timers, indexed by monitor id.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, warn};
use uuid::Uuid;

use super::pipeline::CheckPipeline;
use super::validation::MAX_INTERVAL_SECONDS;

/// How often a monitor fires, derived from its interval in seconds.
///
/// Below a minute the interval is used as is; below an hour it fires every
/// whole minute count; otherwise every whole hour count. Remainders are
/// dropped, so 90 s fires every minute and 5400 s every hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiringPeriod {
    Seconds(u64),
    Minutes(u64),
    Hours(u64),
}

impl FiringPeriod {
    pub fn from_interval(interval_seconds: u64) -> Self {
        match interval_seconds {
            0..60 => FiringPeriod::Seconds(interval_seconds.max(1)),
            60..3600 => FiringPeriod::Minutes(interval_seconds / 60),
            _ => FiringPeriod::Hours(interval_seconds / 3600),
        }
    }

    pub fn as_duration(&self) -> Duration {
        match *self {
            FiringPeriod::Seconds(n) => Duration::from_secs(n),
            FiringPeriod::Minutes(n) => Duration::from_secs(n * 60),
            FiringPeriod::Hours(n) => Duration::from_secs(n * 3600),
        }
    }
}

impl fmt::Display for FiringPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FiringPeriod::Seconds(n) => write!(f, "every {}s", n),
            FiringPeriod::Minutes(n) => write!(f, "every {}m", n),
            FiringPeriod::Hours(n) => write!(f, "every {}h", n),
        }
    }
}

/// A running timer task and the signal that stops it
pub struct TimerHandle {
    cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Spawn a timer that runs `pipeline` for `monitor_id` once per period.
    ///
    /// The first firing happens one period after installation. A firing that
    /// overruns its period skips the missed ticks.
    pub fn spawn(monitor_id: Uuid, period: FiringPeriod, pipeline: Arc<CheckPipeline>) -> Self {
        let (cancel, mut cancelled) = oneshot::channel::<()>();
        let (first, every) = first_tick(monitor_id, period);

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(first, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut cancelled => break,
                    _ = ticker.tick() => {
                        // Runs to completion even if cancellation arrives meanwhile
                        if let Err(e) = pipeline.run(monitor_id).await {
                            warn!(monitor_id = %monitor_id, "Firing failed: {:#}", e);
                        }
                    }
                }
            }

            debug!(monitor_id = %monitor_id, "Timer stopped");
        });

        Self { cancel, task }
    }

    /// Ask the timer to stop after any firing in progress.
    pub fn cancel(self) -> JoinHandle<()> {
        // The task may already have exited; nothing to signal then
        let _ = self.cancel.send(());
        self.task
    }
}

/// First deadline and period for `period`, clamped to the longest valid
/// interval when the deadline would not fit in an `Instant`
fn first_tick(monitor_id: Uuid, period: FiringPeriod) -> (Instant, Duration) {
    let every = period.as_duration();
    let now = Instant::now();
    match now.checked_add(every) {
        Some(first) => (first, every),
        None => {
            let clamped = Duration::from_secs(MAX_INTERVAL_SECONDS);
            warn!(
                monitor_id = %monitor_id,
                "Firing period {} is out of range, clamping to {}s",
                period,
                MAX_INTERVAL_SECONDS
            );
            (now + clamped, clamped)
        }
    }
}

/// The scheduler's table of installed timers
#[derive(Default)]
pub struct TimerTable {
    timers: HashMap<Uuid, TimerHandle>,
}

impl TimerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handle` for `monitor_id`, cancelling any timer it replaces
    pub fn replace(&mut self, monitor_id: Uuid, handle: TimerHandle) {
        if let Some(previous) = self.timers.insert(monitor_id, handle) {
            previous.cancel();
        }
    }

    /// Cancel and forget the timer for `monitor_id`. Returns false if none was installed.
    pub fn cancel(&mut self, monitor_id: Uuid) -> bool {
        match self.timers.remove(&monitor_id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every timer, returning their tasks so the caller can await them
    pub fn cancel_all(&mut self) -> Vec<JoinHandle<()>> {
        self.timers.drain().map(|(_, handle)| handle.cancel()).collect()
    }

    pub fn contains(&self, monitor_id: Uuid) -> bool {
        self.timers.contains_key(&monitor_id)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::AlertManager;
    use crate::cache::StatusCache;
    use crate::monitoring::executor::MonitoringExecutor;
    use crate::notifications::NotificationDispatcher;
    use crate::notifications::dispatcher::{DEFAULT_MAX_CONCURRENT_SENDS, DEFAULT_SEND_TIMEOUT};
    use crate::testing::{MemoryStore, RecordingNotifier};

    fn pipeline(store: Arc<MemoryStore>) -> CheckPipeline {
        let dispatcher = Arc::new(NotificationDispatcher::new(
            store.clone(),
            Arc::new(RecordingNotifier::new()),
            DEFAULT_MAX_CONCURRENT_SENDS,
            DEFAULT_SEND_TIMEOUT,
        ));
        let alerts = AlertManager::new(store.clone(), dispatcher);
        CheckPipeline::new(
            store,
            Arc::new(MonitoringExecutor::empty()),
            alerts,
            Arc::new(StatusCache::default()),
        )
    }

    #[test]
    fn test_firing_period_bands() {
        assert_eq!(FiringPeriod::from_interval(30), FiringPeriod::Seconds(30));
        assert_eq!(FiringPeriod::from_interval(59), FiringPeriod::Seconds(59));
        assert_eq!(FiringPeriod::from_interval(60), FiringPeriod::Minutes(1));
        assert_eq!(FiringPeriod::from_interval(300), FiringPeriod::Minutes(5));
        assert_eq!(FiringPeriod::from_interval(3599), FiringPeriod::Minutes(59));
        assert_eq!(FiringPeriod::from_interval(3600), FiringPeriod::Hours(1));
        assert_eq!(FiringPeriod::from_interval(86400), FiringPeriod::Hours(24));
    }

    #[test]
    fn test_fractional_periods_round_down() {
        assert_eq!(FiringPeriod::from_interval(90), FiringPeriod::Minutes(1));
        assert_eq!(FiringPeriod::from_interval(5400), FiringPeriod::Hours(1));
        assert_eq!(FiringPeriod::from_interval(90).as_duration(), Duration::from_secs(60));
        assert_eq!(FiringPeriod::from_interval(5400).as_duration(), Duration::from_secs(3600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_period_is_clamped() {
        let id = Uuid::new_v4();

        let (first, every) = first_tick(id, FiringPeriod::from_interval(3600));
        assert_eq!(every, Duration::from_secs(3600));
        assert_eq!(first - Instant::now(), every);

        let (_, every) = first_tick(id, FiringPeriod::from_interval(u64::MAX));
        assert_eq!(every, Duration::from_secs(MAX_INTERVAL_SECONDS));
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_timer_keeps_running() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = Arc::new(pipeline(store.clone()));

        let handle = TimerHandle::spawn(Uuid::new_v4(), FiringPeriod::from_interval(u64::MAX), pipeline);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!handle.task.is_finished());

        // Stops cleanly rather than panicking
        assert!(handle.cancel().await.is_ok());
    }

    #[test]
    fn test_display() {
        assert_eq!(FiringPeriod::Seconds(45).to_string(), "every 45s");
        assert_eq!(FiringPeriod::Hours(2).to_string(), "every 2h");
    }
}
