use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, params};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::models::{
    Alert, AlertKind, AlertNotification, ChannelKind, CheckRecord, Monitor, MonitorKind,
    NotificationChannel, SendStatus, Severity, i64_to_timestamp, timestamp_to_i64,
};
use crate::monitoring::types::CheckState;
use crate::pool::LibsqlPool;

/// Durable state consumed by the engine.
///
/// Implementations must be safe to call from many firings at once.
#[async_trait]
pub trait Store: Send + Sync {
    /// All monitors flagged active (cold-start reconciliation)
    async fn find_active_monitors(&self) -> Result<Vec<Monitor>>;

    /// Current row for one monitor, `None` if deleted
    async fn find_monitor(&self, monitor_id: Uuid) -> Result<Option<Monitor>>;

    /// Append one check record
    async fn create_check(&self, check: &CheckRecord) -> Result<()>;

    /// Most recent check record of a monitor
    async fn latest_check(&self, monitor_id: Uuid) -> Result<Option<CheckRecord>>;

    /// The open alert of this kind for a monitor, if any
    async fn find_open_alert(&self, monitor_id: Uuid, kind: &AlertKind) -> Result<Option<Alert>>;

    async fn create_alert(&self, alert: &Alert) -> Result<()>;

    /// Set `resolved_at` on every open alert of this kind; returns how many were resolved
    async fn resolve_open_alerts(&self, monitor_id: Uuid, kind: &AlertKind, at: DateTime<Utc>) -> Result<u64>;

    /// Active notification channels of an organization
    async fn find_active_channels(&self, organization_id: Uuid) -> Result<Vec<NotificationChannel>>;

    async fn create_notification(&self, notification: &AlertNotification) -> Result<()>;

    async fn update_notification(&self, notification: &AlertNotification) -> Result<()>;
}

/// LibSQL store implementation
pub struct LibsqlStore {
    pool: LibsqlPool,
}

const MONITOR_COLUMNS: &str = "id, organization_id, name, kind, target, interval_seconds, timeout_seconds, expected_status, custom_headers, active, created_at, updated_at";
const CHECK_COLUMNS: &str = "id, monitor_id, state, latency_ms, status_code, diagnostic, response_excerpt, checked_at";
const ALERT_COLUMNS: &str = "id, monitor_id, kind, message, severity, created_at, resolved_at";

impl LibsqlStore {
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<crate::pool::LibsqlManager>> {
        Ok(self.pool.get().await?)
    }

    /// Insert or replace a monitor (used by the API layer and fixtures)
    pub async fn save_monitor(&self, monitor: &Monitor) -> Result<()> {
        let conn = self.get_conn().await?;
        let headers = serde_json::to_string(&monitor.headers)?;

        conn.execute(
            "INSERT OR REPLACE INTO monitors (id, organization_id, name, kind, target, interval_seconds, timeout_seconds, expected_status, custom_headers, active, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                monitor.id.to_string(),
                monitor.organization_id.to_string(),
                monitor.name.clone(),
                monitor.kind.as_str(),
                monitor.target.clone(),
                monitor.interval_seconds as i64,
                monitor.timeout_seconds as i64,
                monitor.expected_status as i64,
                headers,
                if monitor.active { 1 } else { 0 },
                timestamp_to_i64(monitor.created_at),
                timestamp_to_i64(monitor.updated_at)
            ],
        )
        .await?;
        Ok(())
    }

    /// Delete a monitor row
    pub async fn delete_monitor(&self, monitor_id: Uuid) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute("DELETE FROM monitors WHERE id = ?", params![monitor_id.to_string()])
            .await?;
        Ok(())
    }

    /// Insert or replace a notification channel
    pub async fn save_channel(&self, channel: &NotificationChannel) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT OR REPLACE INTO notification_channels (id, organization_id, kind, config, active) VALUES (?, ?, ?, ?, ?)",
            params![
                channel.id.to_string(),
                channel.organization_id.to_string(),
                channel.kind.as_str(),
                channel.config.clone(),
                if channel.active { 1 } else { 0 }
            ],
        )
        .await?;
        Ok(())
    }

    /// Delivery records of one alert
    pub async fn notifications_for_alert(&self, alert_id: Uuid) -> Result<Vec<AlertNotification>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, alert_id, channel_id, status, sent_at, error_message FROM alert_notifications WHERE alert_id = ?",
                params![alert_id.to_string()],
            )
            .await?;

        let mut notifications = Vec::new();
        while let Some(row) = rows.next().await? {
            notifications.push(AlertNotification {
                id: parse_uuid(&row, 0)?,
                alert_id: parse_uuid(&row, 1)?,
                channel_id: parse_uuid(&row, 2)?,
                status: SendStatus::parse(&row.get::<String>(3)?),
                sent_at: row.get::<Option<i64>>(4)?.map(i64_to_timestamp),
                error_message: row.get(5)?,
            });
        }
        Ok(notifications)
    }

    /// Every alert of a monitor, newest first
    pub async fn alerts_for_monitor(&self, monitor_id: Uuid) -> Result<Vec<Alert>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {} FROM alerts WHERE monitor_id = ? ORDER BY created_at DESC",
            ALERT_COLUMNS
        );
        let mut rows = conn.query(&sql, params![monitor_id.to_string()]).await?;

        let mut alerts = Vec::new();
        while let Some(row) = rows.next().await? {
            alerts.push(alert_from_row(&row)?);
        }
        Ok(alerts)
    }
}

fn parse_uuid(row: &Row, idx: i32) -> Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).with_context(|| format!("Invalid UUID in column {}: {}", idx, raw))
}

fn monitor_from_row(row: &Row) -> Result<Monitor> {
    let headers_raw: String = row.get(8)?;
    // A malformed header blob should not take the monitor out of rotation
    let headers: BTreeMap<String, String> = serde_json::from_str(&headers_raw).unwrap_or_else(|e| {
        tracing::warn!("Ignoring malformed custom headers: {}", e);
        BTreeMap::new()
    });

    Ok(Monitor {
        id: parse_uuid(row, 0)?,
        organization_id: parse_uuid(row, 1)?,
        name: row.get(2)?,
        kind: MonitorKind::from(row.get::<String>(3)?),
        target: row.get(4)?,
        interval_seconds: row.get::<i64>(5)? as u64,
        timeout_seconds: row.get::<i64>(6)? as u64,
        expected_status: row.get::<i64>(7)? as u16,
        headers,
        active: row.get::<i64>(9)? != 0,
        created_at: i64_to_timestamp(row.get(10)?),
        updated_at: i64_to_timestamp(row.get(11)?),
    })
}

fn check_from_row(row: &Row) -> Result<CheckRecord> {
    Ok(CheckRecord {
        id: parse_uuid(row, 0)?,
        monitor_id: parse_uuid(row, 1)?,
        state: CheckState::parse(&row.get::<String>(2)?),
        latency_ms: row.get::<i64>(3)? as u64,
        status_code: row.get::<i64>(4)? as u16,
        diagnostic: row.get(5)?,
        response_excerpt: row.get(6)?,
        checked_at: i64_to_timestamp(row.get(7)?),
    })
}

fn alert_from_row(row: &Row) -> Result<Alert> {
    Ok(Alert {
        id: parse_uuid(row, 0)?,
        monitor_id: parse_uuid(row, 1)?,
        kind: AlertKind::from(row.get::<String>(2)?),
        message: row.get(3)?,
        severity: Severity::parse(&row.get::<String>(4)?),
        created_at: i64_to_timestamp(row.get(5)?),
        resolved_at: row.get::<Option<i64>>(6)?.map(i64_to_timestamp),
    })
}

#[async_trait]
impl Store for LibsqlStore {
    async fn find_active_monitors(&self) -> Result<Vec<Monitor>> {
        let conn = self.get_conn().await?;
        let sql = format!("SELECT {} FROM monitors WHERE active = 1", MONITOR_COLUMNS);
        let mut rows = conn.query(&sql, ()).await?;

        let mut monitors = Vec::new();
        while let Some(row) = rows.next().await? {
            monitors.push(monitor_from_row(&row)?);
        }
        Ok(monitors)
    }

    async fn find_monitor(&self, monitor_id: Uuid) -> Result<Option<Monitor>> {
        let conn = self.get_conn().await?;
        let sql = format!("SELECT {} FROM monitors WHERE id = ?", MONITOR_COLUMNS);
        let mut rows = conn.query(&sql, params![monitor_id.to_string()]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(monitor_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn create_check(&self, check: &CheckRecord) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO monitor_checks (id, monitor_id, state, latency_ms, status_code, diagnostic, response_excerpt, checked_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                check.id.to_string(),
                check.monitor_id.to_string(),
                check.state.as_str(),
                check.latency_ms as i64,
                check.status_code as i64,
                check.diagnostic.clone(),
                check.response_excerpt.clone(),
                timestamp_to_i64(check.checked_at)
            ],
        )
        .await?;
        Ok(())
    }

    async fn latest_check(&self, monitor_id: Uuid) -> Result<Option<CheckRecord>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {} FROM monitor_checks WHERE monitor_id = ? ORDER BY checked_at DESC, rowid DESC LIMIT 1",
            CHECK_COLUMNS
        );
        let mut rows = conn.query(&sql, params![monitor_id.to_string()]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(check_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_open_alert(&self, monitor_id: Uuid, kind: &AlertKind) -> Result<Option<Alert>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {} FROM alerts WHERE monitor_id = ? AND kind = ? AND resolved_at IS NULL ORDER BY created_at LIMIT 1",
            ALERT_COLUMNS
        );
        let mut rows = conn
            .query(&sql, params![monitor_id.to_string(), kind.as_str()])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(alert_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn create_alert(&self, alert: &Alert) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO alerts (id, monitor_id, kind, message, severity, created_at, resolved_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                alert.id.to_string(),
                alert.monitor_id.to_string(),
                alert.kind.as_str(),
                alert.message.clone(),
                alert.severity.as_str(),
                timestamp_to_i64(alert.created_at),
                alert.resolved_at.map(timestamp_to_i64)
            ],
        )
        .await?;
        Ok(())
    }

    async fn resolve_open_alerts(&self, monitor_id: Uuid, kind: &AlertKind, at: DateTime<Utc>) -> Result<u64> {
        let conn = self.get_conn().await?;
        let resolved = conn
            .execute(
                "UPDATE alerts SET resolved_at = ? WHERE monitor_id = ? AND kind = ? AND resolved_at IS NULL",
                params![timestamp_to_i64(at), monitor_id.to_string(), kind.as_str()],
            )
            .await?;
        Ok(resolved)
    }

    async fn find_active_channels(&self, organization_id: Uuid) -> Result<Vec<NotificationChannel>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, organization_id, kind, config, active FROM notification_channels WHERE organization_id = ? AND active = 1",
                params![organization_id.to_string()],
            )
            .await?;

        let mut channels = Vec::new();
        while let Some(row) = rows.next().await? {
            channels.push(NotificationChannel {
                id: parse_uuid(&row, 0)?,
                organization_id: parse_uuid(&row, 1)?,
                kind: ChannelKind::from(row.get::<String>(2)?),
                config: row.get(3)?,
                active: row.get::<i64>(4)? != 0,
            });
        }
        Ok(channels)
    }

    async fn create_notification(&self, notification: &AlertNotification) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO alert_notifications (id, alert_id, channel_id, status, sent_at, error_message) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                notification.id.to_string(),
                notification.alert_id.to_string(),
                notification.channel_id.to_string(),
                notification.status.as_str(),
                notification.sent_at.map(timestamp_to_i64),
                notification.error_message.clone()
            ],
        )
        .await?;
        Ok(())
    }

    async fn update_notification(&self, notification: &AlertNotification) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "UPDATE alert_notifications SET status = ?, sent_at = ?, error_message = ? WHERE id = ?",
            params![
                notification.status.as_str(),
                notification.sent_at.map(timestamp_to_i64),
                notification.error_message.clone(),
                notification.id.to_string()
            ],
        )
        .await?;
        Ok(())
    }
}
