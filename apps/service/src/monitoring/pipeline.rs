use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

use super::executor::MonitoringExecutor;
use crate::alerting::AlertManager;
use crate::cache::StatusCache;
use crate::database::Store;
use crate::database::models::CheckRecord;

/// One firing: re-read, evaluate, persist, alert, cache.
pub struct CheckPipeline {
    store: Arc<dyn Store>,
    executor: Arc<MonitoringExecutor>,
    alerts: AlertManager,
    cache: Arc<StatusCache>,
}

impl CheckPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        executor: Arc<MonitoringExecutor>,
        alerts: AlertManager,
        cache: Arc<StatusCache>,
    ) -> Self {
        Self { store, executor, alerts, cache }
    }

    /// Run one firing for `monitor_id`.
    ///
    /// Returns `Ok(None)` when the monitor is inactive or gone. An error means
    /// the monitor could not be read or the check record could not be written;
    /// alerting and the cache are skipped in that case.
    pub async fn run(&self, monitor_id: Uuid) -> Result<Option<CheckRecord>> {
        let monitor = self
            .store
            .find_monitor(monitor_id)
            .await
            .context("Failed to re-read monitor")?;

        let Some(monitor) = monitor.filter(|m| m.active) else {
            debug!(monitor_id = %monitor_id, "Monitor inactive or deleted, skipping firing");
            return Ok(None);
        };

        let outcome = self.executor.execute_check(&monitor).await;
        let record = CheckRecord::from_outcome(monitor.id, &outcome, Utc::now());

        self.store
            .create_check(&record)
            .await
            .context("Failed to persist check record")?;

        if let Err(e) = self.alerts.handle(&monitor, &outcome).await {
            error!(monitor_id = %monitor.id, "Alert handling failed: {:#}", e);
        }

        self.cache
            .put_at(monitor.id, record.state, record.latency_ms, record.checked_at);

        Ok(Some(record))
    }
}
