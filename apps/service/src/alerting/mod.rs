//! Alert lifecycle: open on down, deduplicate, resolve on recovery.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

use crate::database::Store;
use crate::database::models::{Alert, AlertKind, Monitor, Severity};
use crate::monitoring::types::{CheckOutcome, CheckState};
use crate::notifications::NotificationDispatcher;

/// What the manager did with one check outcome
#[derive(Debug, Clone, PartialEq)]
pub enum AlertAction {
    /// A new alert was opened and its notifications queued
    Opened(Alert),
    /// The monitor is down but an alert is already open
    AlreadyOpen,
    /// The monitor recovered; this many open alerts were resolved (possibly 0)
    Resolved(u64),
    /// Warning and unknown states carry no alert semantics
    Ignored,
}

pub struct AlertManager {
    store: Arc<dyn Store>,
    dispatcher: Arc<NotificationDispatcher>,
}

impl AlertManager {
    pub fn new(store: Arc<dyn Store>, dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    pub async fn handle(&self, monitor: &Monitor, outcome: &CheckOutcome) -> Result<AlertAction> {
        match outcome.state {
            CheckState::Down => self.open_down_alert(monitor).await,
            CheckState::Up => {
                let resolved = self
                    .store
                    .resolve_open_alerts(monitor.id, &AlertKind::Down, Utc::now())
                    .await?;
                if resolved > 0 {
                    info!(monitor_id = %monitor.id, "Resolved {} open down alert(s)", resolved);
                }
                Ok(AlertAction::Resolved(resolved))
            }
            CheckState::Warning | CheckState::Unknown => {
                debug!(monitor_id = %monitor.id, state = %outcome.state, "No alert action");
                Ok(AlertAction::Ignored)
            }
        }
    }

    async fn open_down_alert(&self, monitor: &Monitor) -> Result<AlertAction> {
        if self.store.find_open_alert(monitor.id, &AlertKind::Down).await?.is_some() {
            debug!(monitor_id = %monitor.id, "Down alert already open");
            return Ok(AlertAction::AlreadyOpen);
        }

        let alert = Alert::open(
            monitor.id,
            AlertKind::Down,
            down_message(monitor),
            Severity::High,
        );
        self.store.create_alert(&alert).await?;
        info!(monitor_id = %monitor.id, alert_id = %alert.id, "Opened down alert");

        self.dispatcher.dispatch(&alert, monitor.organization_id).await;
        Ok(AlertAction::Opened(alert))
    }
}

fn down_message(monitor: &Monitor) -> String {
    format!("Monitor {} ({}) is down", monitor.name, monitor.target)
}
