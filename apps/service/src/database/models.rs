use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::monitoring::types::{CheckOutcome, CheckState};

/// What a monitor checks. Stored as `http`, `ssl` and `webhook`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum MonitorKind {
    /// GET the target and compare the status code
    Reachability,
    /// TLS handshake and leaf certificate expiry
    CertificateExpiry,
    /// Webhook delivery probe; evaluated like reachability for now
    DeliveryProbe,
    /// Anything else found in storage, kept verbatim
    Unrecognized(String),
}

impl MonitorKind {
    pub fn as_str(&self) -> &str {
        match self {
            MonitorKind::Reachability => "http",
            MonitorKind::CertificateExpiry => "ssl",
            MonitorKind::DeliveryProbe => "webhook",
            MonitorKind::Unrecognized(other) => other,
        }
    }
}

impl From<&str> for MonitorKind {
    fn from(value: &str) -> Self {
        match value {
            "http" => MonitorKind::Reachability,
            "ssl" => MonitorKind::CertificateExpiry,
            "webhook" => MonitorKind::DeliveryProbe,
            other => MonitorKind::Unrecognized(other.to_string()),
        }
    }
}

impl From<String> for MonitorKind {
    fn from(value: String) -> Self {
        MonitorKind::from(value.as_str())
    }
}

impl From<MonitorKind> for String {
    fn from(value: MonitorKind) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monitor model - a configured target checked periodically
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monitor {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub kind: MonitorKind,
    pub target: String,
    pub interval_seconds: u64,
    pub timeout_seconds: u64,
    pub expected_status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Monitor {
    /// Create a new monitor with the same defaults the API applies
    pub fn new(organization_id: Uuid, name: String, kind: MonitorKind, target: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            name,
            kind,
            target,
            interval_seconds: 300,
            timeout_seconds: 30,
            expected_status: 200,
            headers: BTreeMap::new(),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// CheckRecord model - one immutable evaluation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub id: Uuid,
    pub monitor_id: Uuid,
    pub state: CheckState,
    pub latency_ms: u64,
    /// Protocol status code, 0 when not applicable
    pub status_code: u16,
    pub diagnostic: String,
    pub response_excerpt: String,
    pub checked_at: DateTime<Utc>,
}

impl CheckRecord {
    pub fn from_outcome(monitor_id: Uuid, outcome: &CheckOutcome, checked_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            monitor_id,
            state: outcome.state,
            latency_ms: outcome.latency_ms,
            status_code: outcome.status_code,
            diagnostic: outcome.diagnostic.clone().unwrap_or_default(),
            response_excerpt: outcome.body.clone().unwrap_or_default(),
            checked_at,
        }
    }
}

/// Problem class of an alert. At most one alert per (monitor, kind) is open.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum AlertKind {
    Down,
    Other(String),
}

impl AlertKind {
    pub fn as_str(&self) -> &str {
        match self {
            AlertKind::Down => "down",
            AlertKind::Other(other) => other,
        }
    }
}

impl From<String> for AlertKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "down" => AlertKind::Down,
            _ => AlertKind::Other(value),
        }
    }
}

impl From<AlertKind> for String {
    fn from(value: AlertKind) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Parse a stored severity. Unknown values fall back to `Medium`, the column default.
    pub fn parse(value: &str) -> Self {
        match value {
            "low" => Severity::Low,
            "high" => Severity::High,
            "critical" => Severity::Critical,
            _ => Severity::Medium,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub monitor_id: Uuid,
    pub kind: AlertKind,
    pub message: String,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn open(monitor_id: Uuid, kind: AlertKind, message: String, severity: Severity) -> Self {
        Self {
            id: Uuid::new_v4(),
            monitor_id,
            kind,
            message,
            severity,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ChannelKind {
    Email,
    Slack,
    Discord,
    Webhook,
    Unsupported(String),
}

impl ChannelKind {
    pub fn as_str(&self) -> &str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::Slack => "slack",
            ChannelKind::Discord => "discord",
            ChannelKind::Webhook => "webhook",
            ChannelKind::Unsupported(other) => other,
        }
    }
}

impl From<String> for ChannelKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "email" => ChannelKind::Email,
            "slack" => ChannelKind::Slack,
            "discord" => ChannelKind::Discord,
            "webhook" => ChannelKind::Webhook,
            _ => ChannelKind::Unsupported(value),
        }
    }
}

impl From<ChannelKind> for String {
    fn from(value: ChannelKind) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// NotificationChannel model. `config` is an opaque JSON blob that only the
/// sender for `kind` knows how to read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub kind: ChannelKind,
    pub config: String,
    pub active: bool,
}

impl NotificationChannel {
    pub fn new(organization_id: Uuid, kind: ChannelKind, config: String) -> Self {
        Self { id: Uuid::new_v4(), organization_id, kind, config, active: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendStatus {
    Pending,
    Sent,
    Failed,
}

impl SendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendStatus::Pending => "pending",
            SendStatus::Sent => "sent",
            SendStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "sent" => SendStatus::Sent,
            "failed" => SendStatus::Failed,
            _ => SendStatus::Pending,
        }
    }
}

/// AlertNotification model - delivery record of one alert through one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertNotification {
    pub id: Uuid,
    pub alert_id: Uuid,
    pub channel_id: Uuid,
    pub status: SendStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl AlertNotification {
    pub fn pending(alert_id: Uuid, channel_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert_id,
            channel_id,
            status: SendStatus::Pending,
            sent_at: None,
            error_message: None,
        }
    }

    pub fn mark_sent(&mut self, at: DateTime<Utc>) {
        self.status = SendStatus::Sent;
        self.sent_at = Some(at);
        self.error_message = None;
    }

    pub fn mark_failed(&mut self, at: DateTime<Utc>, error: String) {
        self.status = SendStatus::Failed;
        self.sent_at = Some(at);
        self.error_message = Some(error);
    }
}

/// Convert a timestamp to unix seconds for storage
pub fn timestamp_to_i64(time: DateTime<Utc>) -> i64 {
    time.timestamp()
}

/// Convert unix seconds back to a timestamp
pub fn i64_to_timestamp(timestamp: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(timestamp, 0).single().unwrap_or_default()
}
