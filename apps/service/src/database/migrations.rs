use anyhow::Result;
use libsql::Connection;

use super::models::timestamp_to_i64;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 1;

/// Run database migrations.
///
/// Only the tables the engine reads and writes live here; the rest of the
/// product schema belongs to the API layer.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::info!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Monitoring engine schema").await?;
    }

    tracing::info!("Database migrations completed successfully (now at version {})", SCHEMA_VERSION);
    Ok(())
}

/// Get current schema version from database
async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?1, ?2, ?3)",
        libsql::params![version, timestamp_to_i64(chrono::Utc::now()), description],
    )
    .await?;
    Ok(())
}

/// Monitors, check history, alerts, channels and delivery records
async fn run_migration_v1(conn: &Connection) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS monitors (
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            target TEXT NOT NULL,
            interval_seconds INTEGER NOT NULL DEFAULT 300,
            timeout_seconds INTEGER NOT NULL DEFAULT 30,
            expected_status INTEGER NOT NULL DEFAULT 200,
            custom_headers TEXT NOT NULL DEFAULT '{}',
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_monitors_active ON monitors(active)",
        "CREATE TABLE IF NOT EXISTS monitor_checks (
            id TEXT PRIMARY KEY,
            monitor_id TEXT NOT NULL,
            state TEXT NOT NULL,
            latency_ms INTEGER NOT NULL,
            status_code INTEGER NOT NULL DEFAULT 0,
            diagnostic TEXT NOT NULL DEFAULT '',
            response_excerpt TEXT NOT NULL DEFAULT '',
            checked_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_monitor_checks_monitor_time
            ON monitor_checks(monitor_id, checked_at DESC)",
        "CREATE TABLE IF NOT EXISTS alerts (
            id TEXT PRIMARY KEY,
            monitor_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            message TEXT NOT NULL,
            severity TEXT NOT NULL DEFAULT 'medium',
            created_at INTEGER NOT NULL,
            resolved_at INTEGER
        )",
        "CREATE INDEX IF NOT EXISTS idx_alerts_open ON alerts(monitor_id, kind, resolved_at)",
        "CREATE TABLE IF NOT EXISTS notification_channels (
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            config TEXT NOT NULL DEFAULT '{}',
            active INTEGER NOT NULL DEFAULT 1
        )",
        "CREATE INDEX IF NOT EXISTS idx_channels_org ON notification_channels(organization_id, active)",
        "CREATE TABLE IF NOT EXISTS alert_notifications (
            id TEXT PRIMARY KEY,
            alert_id TEXT NOT NULL,
            channel_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            sent_at INTEGER,
            error_message TEXT
        )",
        "CREATE INDEX IF NOT EXISTS idx_alert_notifications_alert ON alert_notifications(alert_id)",
    ];

    for statement in statements {
        conn.execute(statement, ()).await?;
    }

    Ok(())
}
