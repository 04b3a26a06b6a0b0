//! In-memory collaborators for unit tests.

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

use crate::database::Store;
use crate::database::models::{
    Alert, AlertKind, AlertNotification, CheckRecord, Monitor, NotificationChannel,
};
use crate::monitoring::checker::Checker;
use crate::monitoring::types::ProbeResult;
use crate::notifications::{Notifier, SenderError};

#[derive(Default)]
struct State {
    monitors: HashMap<Uuid, Monitor>,
    checks: Vec<CheckRecord>,
    alerts: Vec<Alert>,
    channels: Vec<NotificationChannel>,
    notifications: Vec<AlertNotification>,
}

/// Store backed by vectors behind a mutex. Can simulate an outage.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
    fail_check_writes: AtomicBool,
    active_snapshot: Mutex<Option<Vec<Monitor>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every trait call fails while set
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Only `create_check` fails while set
    pub fn fail_check_writes(&self, fail: bool) {
        self.fail_check_writes.store(fail, Ordering::SeqCst);
    }

    /// `find_active_monitors` answers with these rows instead of the live ones
    pub fn set_active_snapshot(&self, monitors: Vec<Monitor>) {
        *self.active_snapshot.lock().unwrap() = Some(monitors);
    }

    pub fn save_monitor(&self, monitor: Monitor) {
        self.state.lock().unwrap().monitors.insert(monitor.id, monitor);
    }

    pub fn save_channel(&self, channel: NotificationChannel) {
        self.state.lock().unwrap().channels.push(channel);
    }

    pub fn checks(&self) -> Vec<CheckRecord> {
        self.state.lock().unwrap().checks.clone()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.state.lock().unwrap().alerts.clone()
    }

    pub fn notifications(&self) -> Vec<AlertNotification> {
        self.state.lock().unwrap().notifications.clone()
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("store unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_active_monitors(&self) -> Result<Vec<Monitor>> {
        self.ensure_available()?;
        if let Some(snapshot) = self.active_snapshot.lock().unwrap().clone() {
            return Ok(snapshot);
        }
        Ok(self.state.lock().unwrap().monitors.values().filter(|m| m.active).cloned().collect())
    }

    async fn find_monitor(&self, monitor_id: Uuid) -> Result<Option<Monitor>> {
        self.ensure_available()?;
        Ok(self.state.lock().unwrap().monitors.get(&monitor_id).cloned())
    }

    async fn create_check(&self, check: &CheckRecord) -> Result<()> {
        self.ensure_available()?;
        if self.fail_check_writes.load(Ordering::SeqCst) {
            bail!("disk full");
        }
        self.state.lock().unwrap().checks.push(check.clone());
        Ok(())
    }

    async fn latest_check(&self, monitor_id: Uuid) -> Result<Option<CheckRecord>> {
        self.ensure_available()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .checks
            .iter()
            .filter(|c| c.monitor_id == monitor_id)
            .max_by_key(|c| c.checked_at)
            .cloned())
    }

    async fn find_open_alert(&self, monitor_id: Uuid, kind: &AlertKind) -> Result<Option<Alert>> {
        self.ensure_available()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .alerts
            .iter()
            .find(|a| a.monitor_id == monitor_id && &a.kind == kind && a.is_open())
            .cloned())
    }

    async fn create_alert(&self, alert: &Alert) -> Result<()> {
        self.ensure_available()?;
        self.state.lock().unwrap().alerts.push(alert.clone());
        Ok(())
    }

    async fn resolve_open_alerts(&self, monitor_id: Uuid, kind: &AlertKind, at: DateTime<Utc>) -> Result<u64> {
        self.ensure_available()?;
        let mut state = self.state.lock().unwrap();
        let mut resolved = 0;
        for alert in state
            .alerts
            .iter_mut()
            .filter(|a| a.monitor_id == monitor_id && &a.kind == kind && a.is_open())
        {
            alert.resolved_at = Some(at);
            resolved += 1;
        }
        Ok(resolved)
    }

    async fn find_active_channels(&self, organization_id: Uuid) -> Result<Vec<NotificationChannel>> {
        self.ensure_available()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .channels
            .iter()
            .filter(|c| c.organization_id == organization_id && c.active)
            .cloned()
            .collect())
    }

    async fn create_notification(&self, notification: &AlertNotification) -> Result<()> {
        self.ensure_available()?;
        self.state.lock().unwrap().notifications.push(notification.clone());
        Ok(())
    }

    async fn update_notification(&self, notification: &AlertNotification) -> Result<()> {
        self.ensure_available()?;
        let mut state = self.state.lock().unwrap();
        match state.notifications.iter_mut().find(|n| n.id == notification.id) {
            Some(row) => *row = notification.clone(),
            None => bail!("notification {} not found", notification.id),
        }
        Ok(())
    }
}

/// Checker that always answers with the same probe
pub struct ScriptedChecker {
    probe: ProbeResult,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedChecker {
    pub fn always(probe: ProbeResult) -> Self {
        Self { probe, delay: None, calls: AtomicUsize::new(0) }
    }

    /// Sleep (on the tokio clock) before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Checker for ScriptedChecker {
    async fn check(&self, _monitor: &Monitor) -> ProbeResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.probe.clone()
    }
}

/// Notifier that records every send and fails for chosen channels
#[derive(Default)]
pub struct RecordingNotifier {
    failing: HashSet<Uuid>,
    delay: Option<Duration>,
    sent: Mutex<Vec<(Uuid, Uuid)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(channels: impl IntoIterator<Item = Uuid>) -> Self {
        Self { failing: channels.into_iter().collect(), ..Self::default() }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// `(channel_id, alert_id)` of every attempted send
    pub fn sent(&self) -> Vec<(Uuid, Uuid)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, channel: &NotificationChannel, alert: &Alert) -> Result<(), SenderError> {
        self.sent.lock().unwrap().push((channel.id, alert.id));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(&channel.id) {
            return Err(SenderError::SendFailed(format!("channel {} rejected the message", channel.id)));
        }
        Ok(())
    }
}
