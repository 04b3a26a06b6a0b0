use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::executor::MonitoringExecutor;
use super::pipeline::CheckPipeline;
use super::timers::{FiringPeriod, TimerHandle, TimerTable};
use super::validation::{ValidationError, validate_monitor};
use crate::alerting::AlertManager;
use crate::cache::{CachedStatus, StatusCache};
use crate::database::Store;
use crate::database::models::{CheckRecord, Monitor};
use crate::notifications::NotificationDispatcher;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Invalid monitor {id}: {source}")]
    InvalidMonitor {
        id: Uuid,
        #[source]
        source: ValidationError,
    },
    #[error("Scheduler is not running")]
    NotRunning,
    #[error("Scheduler is already running")]
    AlreadyRunning,
    #[error("Cold-start reconciliation failed: {0:#}")]
    ColdStart(anyhow::Error),
    #[error("Store error: {0:#}")]
    Store(anyhow::Error),
}

/// Owns the per-monitor timers and the read path over recent status.
///
/// The CRUD layer calls [`Scheduler::upsert`] on create and update and
/// [`Scheduler::remove`] on delete. Each firing goes through the shared
/// [`CheckPipeline`].
pub struct Scheduler {
    store: Arc<dyn Store>,
    pipeline: Arc<CheckPipeline>,
    cache: Arc<StatusCache>,
    dispatcher: Arc<NotificationDispatcher>,
    timers: Mutex<TimerTable>,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        executor: MonitoringExecutor,
        dispatcher: Arc<NotificationDispatcher>,
        cache: Arc<StatusCache>,
    ) -> Self {
        let alerts = AlertManager::new(store.clone(), dispatcher.clone());
        let pipeline = Arc::new(CheckPipeline::new(
            store.clone(),
            Arc::new(executor),
            alerts,
            cache.clone(),
        ));

        Self {
            store,
            pipeline,
            cache,
            dispatcher,
            timers: Mutex::new(TimerTable::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start scheduling and install a timer for every active monitor.
    ///
    /// Returns how many timers were installed. If the active monitors cannot
    /// be loaded the error is returned, but the scheduler stays running so
    /// later upserts still work.
    pub async fn start(&self) -> Result<usize, SchedulerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }
        info!("Monitor scheduler started");

        let monitors = self
            .store
            .find_active_monitors()
            .await
            .map_err(SchedulerError::ColdStart)?;

        let mut installed = 0;
        for snapshot in &monitors {
            // Held across the re-read so a concurrent upsert lands after this install
            let mut timers = self.timers.lock().await;
            if !self.is_running() {
                break;
            }
            let monitor = match self.store.find_monitor(snapshot.id).await {
                Ok(Some(monitor)) => monitor,
                Ok(None) => {
                    debug!(monitor_id = %snapshot.id, "Monitor deleted during cold start");
                    continue;
                }
                Err(e) => {
                    warn!(monitor_id = %snapshot.id, "Failed to re-read monitor, using snapshot: {:#}", e);
                    snapshot.clone()
                }
            };

            match self.install(&mut timers, &monitor) {
                Ok(true) => installed += 1,
                Ok(false) => {}
                Err(e) => warn!(monitor_id = %monitor.id, "Skipping monitor at cold start: {}", e),
            }
        }

        info!("Scheduled {} of {} active monitor(s)", installed, monitors.len());
        Ok(installed)
    }

    /// Stop every timer and wait up to `grace` for in-flight firings and
    /// notification sends before aborting them.
    pub async fn stop(&self, grace: Duration) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let deadline = Instant::now() + grace;
        let tasks = self.timers.lock().await.cancel_all();
        info!("Stopping {} monitor timer(s)", tasks.len());

        for mut task in tasks {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                warn!("Aborting a firing still running at shutdown");
                task.abort();
            }
        }

        self.dispatcher
            .shutdown(deadline.saturating_duration_since(Instant::now()))
            .await;
        info!("Monitor scheduler stopped");
    }

    /// Install or replace the timer for `monitor`.
    ///
    /// An inactive monitor has its timer removed instead.
    pub async fn upsert(&self, monitor: &Monitor) -> Result<(), SchedulerError> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        let mut timers = self.timers.lock().await;
        self.install(&mut timers, monitor)?;
        Ok(())
    }

    /// Replace the timer for `monitor`. Returns whether a timer is now installed.
    fn install(&self, timers: &mut TimerTable, monitor: &Monitor) -> Result<bool, SchedulerError> {
        validate_monitor(monitor).map_err(|source| SchedulerError::InvalidMonitor { id: monitor.id, source })?;

        if !monitor.active {
            timers.cancel(monitor.id);
            debug!(monitor_id = %monitor.id, "Monitor inactive, timer removed");
            return Ok(false);
        }

        let period = FiringPeriod::from_interval(monitor.interval_seconds);
        timers.replace(monitor.id, TimerHandle::spawn(monitor.id, period, self.pipeline.clone()));
        debug!(monitor_id = %monitor.id, %period, "Timer installed");
        Ok(true)
    }

    /// Cancel the timer and evict the cached status. Idempotent.
    pub async fn remove(&self, monitor_id: Uuid) {
        if self.timers.lock().await.cancel(monitor_id) {
            debug!(monitor_id = %monitor_id, "Timer removed");
        }
        self.cache.invalidate(monitor_id);
    }

    pub fn get_cached_status(&self, monitor_id: Uuid) -> Option<CachedStatus> {
        self.cache.get(monitor_id)
    }

    /// Cached status, falling back to the latest stored check on a miss.
    pub async fn current_status(&self, monitor_id: Uuid) -> Result<Option<CachedStatus>, SchedulerError> {
        if let Some(status) = self.cache.get(monitor_id) {
            return Ok(Some(status));
        }

        let Some(record) = self.store.latest_check(monitor_id).await.map_err(SchedulerError::Store)? else {
            return Ok(None);
        };

        let age = (chrono::Utc::now() - record.checked_at).to_std().unwrap_or_default();
        if age < self.cache.ttl() {
            self.cache
                .put_at(monitor_id, record.state, record.latency_ms, record.checked_at);
        }

        Ok(Some(CachedStatus {
            state: record.state,
            latency_ms: record.latency_ms,
            updated_at: record.checked_at,
        }))
    }

    /// Run one firing now, outside the timer.
    pub async fn check_now(&self, monitor_id: Uuid) -> Result<Option<CheckRecord>, SchedulerError> {
        self.pipeline.run(monitor_id).await.map_err(SchedulerError::Store)
    }

    pub async fn is_scheduled(&self, monitor_id: Uuid) -> bool {
        self.timers.lock().await.contains(monitor_id)
    }

    pub async fn scheduled_count(&self) -> usize {
        self.timers.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{ChannelKind, MonitorKind, NotificationChannel, SendStatus, Severity};
    use crate::monitoring::checker::{Checker, HttpChecker, classify_expiry};
    use crate::monitoring::types::{CheckOutcome, CheckState, ProbeResult};
    use crate::notifications::dispatcher::DEFAULT_SEND_TIMEOUT;
    use crate::testing::{MemoryStore, RecordingNotifier, ScriptedChecker};
    use chrono::Utc;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Harness {
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
        dispatcher: Arc<NotificationDispatcher>,
        scheduler: Scheduler,
    }

    fn harness(kind: MonitorKind, checker: Arc<dyn Checker>) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let dispatcher = Arc::new(NotificationDispatcher::new(store.clone(), notifier.clone(), 4, DEFAULT_SEND_TIMEOUT));
        let executor = MonitoringExecutor::empty().with_checker(kind, checker);
        let scheduler = Scheduler::new(store.clone(), executor, dispatcher.clone(), Arc::new(StatusCache::default()));
        Harness { store, notifier, dispatcher, scheduler }
    }

    fn monitor(interval_seconds: u64) -> Monitor {
        let mut monitor = Monitor::new(
            Uuid::new_v4(),
            "api".into(),
            MonitorKind::Reachability,
            "https://api.example.com".into(),
        );
        monitor.interval_seconds = interval_seconds;
        monitor
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_upsert_keeps_one_timer() {
        let checker = Arc::new(ScriptedChecker::always(ProbeResult::up(200)));
        let h = harness(MonitorKind::Reachability, checker.clone());
        h.scheduler.start().await.unwrap();

        let m = monitor(30);
        h.store.save_monitor(m.clone());
        h.scheduler.upsert(&m).await.unwrap();
        h.scheduler.upsert(&m).await.unwrap();
        assert_eq!(h.scheduler.scheduled_count().await, 1);

        tokio::time::sleep(Duration::from_secs(95)).await;

        assert_eq!(checker.calls(), 3);
        assert_eq!(h.store.checks().len(), 3);
        h.scheduler.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_minute_band_period() {
        let checker = Arc::new(ScriptedChecker::always(ProbeResult::up(200)));
        let h = harness(MonitorKind::Reachability, checker.clone());
        h.scheduler.start().await.unwrap();

        // 90 s rounds down to one minute
        let m = monitor(90);
        h.store.save_monitor(m.clone());
        h.scheduler.upsert(&m).await.unwrap();

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(checker.calls(), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(checker.calls(), 1);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(checker.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_firing_rereads_active_flag() {
        let checker = Arc::new(ScriptedChecker::always(ProbeResult::up(200)));
        let h = harness(MonitorKind::Reachability, checker.clone());
        h.scheduler.start().await.unwrap();

        let mut m = monitor(30);
        h.store.save_monitor(m.clone());
        h.scheduler.upsert(&m).await.unwrap();

        // Deactivated in the store without telling the scheduler
        m.active = false;
        h.store.save_monitor(m.clone());
        tokio::time::sleep(Duration::from_secs(65)).await;

        assert_eq!(checker.calls(), 0);
        assert!(h.store.checks().is_empty());
        assert!(h.scheduler.is_scheduled(m.id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactive_upsert_and_remove() {
        let checker = Arc::new(ScriptedChecker::always(ProbeResult::up(200)));
        let h = harness(MonitorKind::Reachability, checker.clone());
        h.scheduler.start().await.unwrap();

        let mut m = monitor(30);
        h.store.save_monitor(m.clone());
        h.scheduler.upsert(&m).await.unwrap();
        assert!(h.scheduler.is_scheduled(m.id).await);

        m.active = false;
        h.scheduler.upsert(&m).await.unwrap();
        assert!(!h.scheduler.is_scheduled(m.id).await);

        m.active = true;
        h.scheduler.upsert(&m).await.unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(checker.calls(), 1);
        assert!(h.scheduler.get_cached_status(m.id).is_some());

        h.scheduler.remove(m.id).await;
        h.scheduler.remove(m.id).await;
        assert!(!h.scheduler.is_scheduled(m.id).await);
        assert!(h.scheduler.get_cached_status(m.id).is_none());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(checker.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_monitor_rejected() {
        let checker = Arc::new(ScriptedChecker::always(ProbeResult::up(200)));
        let h = harness(MonitorKind::Reachability, checker);
        h.scheduler.start().await.unwrap();

        let m = monitor(10);
        let err = h.scheduler.upsert(&m).await.unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::InvalidMonitor { source: ValidationError::IntervalTooShort(10), .. }
        ));
        assert_eq!(h.scheduler.scheduled_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_start_installs_active_monitors() {
        let checker = Arc::new(ScriptedChecker::always(ProbeResult::up(200)));
        let h = harness(MonitorKind::Reachability, checker);

        let active = monitor(60);
        let mut inactive = monitor(60);
        inactive.active = false;
        let invalid = monitor(5);
        for m in [&active, &inactive, &invalid] {
            h.store.save_monitor(m.clone());
        }

        // Not running yet
        assert!(matches!(h.scheduler.upsert(&active).await, Err(SchedulerError::NotRunning)));

        assert_eq!(h.scheduler.start().await.unwrap(), 1);
        assert!(h.scheduler.is_scheduled(active.id).await);
        assert!(!h.scheduler.is_scheduled(inactive.id).await);
        assert!(!h.scheduler.is_scheduled(invalid.id).await);
        assert!(matches!(h.scheduler.start().await, Err(SchedulerError::AlreadyRunning)));

        h.scheduler.stop(Duration::from_secs(1)).await;
        assert_eq!(h.scheduler.scheduled_count().await, 0);
        assert!(!h.scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_start_installs_current_row_not_snapshot() {
        let checker = Arc::new(ScriptedChecker::always(ProbeResult::up(200)));
        let h = harness(MonitorKind::Reachability, checker.clone());

        // Interval changed to an hour after the active list was read
        let stale = monitor(30);
        let mut current = stale.clone();
        current.interval_seconds = 3600;
        h.store.save_monitor(current.clone());

        let deleted = monitor(30);
        h.store.set_active_snapshot(vec![stale, deleted.clone()]);

        assert_eq!(h.scheduler.start().await.unwrap(), 1);
        assert!(h.scheduler.is_scheduled(current.id).await);
        assert!(!h.scheduler.is_scheduled(deleted.id).await);

        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(checker.calls(), 0);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(checker.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_interval_rejected() {
        let checker = Arc::new(ScriptedChecker::always(ProbeResult::up(200)));
        let h = harness(MonitorKind::Reachability, checker);
        h.scheduler.start().await.unwrap();

        let m = monitor(u64::MAX);
        let err = h.scheduler.upsert(&m).await.unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::InvalidMonitor { source: ValidationError::IntervalTooLong(u64::MAX), .. }
        ));
        assert!(!h.scheduler.is_scheduled(m.id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_start_failure_keeps_scheduler_usable() {
        let checker = Arc::new(ScriptedChecker::always(ProbeResult::up(200)));
        let h = harness(MonitorKind::Reachability, checker.clone());
        h.store.set_unavailable(true);

        assert!(matches!(h.scheduler.start().await, Err(SchedulerError::ColdStart(_))));
        assert!(h.scheduler.is_running());

        h.store.set_unavailable(false);
        let m = monitor(30);
        h.store.save_monitor(m.clone());
        h.scheduler.upsert(&m).await.unwrap();

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(checker.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_outage_does_not_cancel_timer() {
        let checker = Arc::new(ScriptedChecker::always(ProbeResult::up(200)));
        let h = harness(MonitorKind::Reachability, checker.clone());
        h.scheduler.start().await.unwrap();

        let m = monitor(30);
        h.store.save_monitor(m.clone());
        h.scheduler.upsert(&m).await.unwrap();

        h.store.set_unavailable(true);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(checker.calls(), 0);

        h.store.set_unavailable(false);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(checker.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_lets_running_firing_finish() {
        let checker = Arc::new(
            ScriptedChecker::always(ProbeResult::up(200)).with_delay(Duration::from_secs(10)),
        );
        let h = harness(MonitorKind::Reachability, checker.clone());
        h.scheduler.start().await.unwrap();

        let m = monitor(30);
        h.store.save_monitor(m.clone());
        h.scheduler.upsert(&m).await.unwrap();

        // Mid-firing: the check started at 30 s and takes 10 s
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(checker.calls(), 1);

        h.scheduler.stop(Duration::from_secs(30)).await;
        assert_eq!(h.store.checks().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_current_status_falls_back_to_latest_check() {
        let checker = Arc::new(ScriptedChecker::always(ProbeResult::up(200)));
        let h = harness(MonitorKind::Reachability, checker);
        let m = monitor(60);
        h.store.save_monitor(m.clone());

        assert!(h.scheduler.current_status(m.id).await.unwrap().is_none());

        let outcome = CheckOutcome::from_probe(ProbeResult::down(500, "expected status 200, got 500"), 42);
        h.store
            .create_check(&CheckRecord::from_outcome(m.id, &outcome, Utc::now()))
            .await
            .unwrap();

        let status = h.scheduler.current_status(m.id).await.unwrap().unwrap();
        assert_eq!(status.state, CheckState::Down);
        assert_eq!(status.latency_ms, 42);
        // Recent enough to re-prime the cache
        assert_eq!(h.scheduler.get_cached_status(m.id), Some(status));
    }

    #[tokio::test]
    async fn test_unexpected_status_end_to_end() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let h = harness(MonitorKind::Reachability, Arc::new(HttpChecker::new().unwrap()));
        let mut m = monitor(60);
        m.target = server.uri();
        m.timeout_seconds = 5;
        h.store.save_monitor(m.clone());

        let org = m.organization_id;
        let mut inactive = NotificationChannel::new(org, ChannelKind::Discord, "{}".into());
        inactive.active = false;
        for channel in [
            NotificationChannel::new(org, ChannelKind::Email, "{}".into()),
            NotificationChannel::new(org, ChannelKind::Slack, "{}".into()),
            inactive,
        ] {
            h.store.save_channel(channel);
        }

        let record = h.scheduler.check_now(m.id).await.unwrap().unwrap();
        assert_eq!(record.state, CheckState::Down);
        assert_eq!(record.status_code, 503);
        assert_eq!(record.diagnostic, "expected status 200, got 503");

        // Second failing firing does not open another alert
        h.scheduler.check_now(m.id).await.unwrap();

        h.dispatcher.shutdown(Duration::from_secs(5)).await;

        let alerts = h.store.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::High);
        assert_eq!(alerts[0].kind.as_str(), "down");

        let notifications = h.store.notifications();
        assert_eq!(notifications.len(), 2);
        assert!(notifications.iter().all(|n| n.status == SendStatus::Sent));
        assert_eq!(h.notifier.sent().len(), 2);

        let cached = h.scheduler.get_cached_status(m.id).unwrap();
        assert_eq!(cached.state, CheckState::Down);
    }

    #[tokio::test]
    async fn test_expiring_certificate_warns_without_alert() {
        let now = Utc::now();
        let probe = classify_expiry(now + chrono::Duration::days(10), now);
        let checker = Arc::new(ScriptedChecker::always(probe));
        let h = harness(MonitorKind::CertificateExpiry, checker);

        let mut m = monitor(3600);
        m.kind = MonitorKind::CertificateExpiry;
        m.target = "example.com".into();
        h.store.save_monitor(m.clone());
        h.store
            .save_channel(NotificationChannel::new(m.organization_id, ChannelKind::Slack, "{}".into()));

        let record = h.scheduler.check_now(m.id).await.unwrap().unwrap();
        assert_eq!(record.state, CheckState::Warning);
        assert!(record.diagnostic.starts_with("certificate expires in 10 days"));

        assert!(h.store.alerts().is_empty());
        assert!(h.store.notifications().is_empty());
    }

    #[tokio::test]
    async fn test_check_now_surfaces_store_failure() {
        let checker = Arc::new(ScriptedChecker::always(ProbeResult::up(200)));
        let h = harness(MonitorKind::Reachability, checker);
        h.store.set_unavailable(true);

        assert!(matches!(
            h.scheduler.check_now(Uuid::new_v4()).await,
            Err(SchedulerError::Store(_))
        ));
    }
}
