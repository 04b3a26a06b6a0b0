use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::database::models::{Alert, ChannelKind, NotificationChannel};

pub mod chat;
pub mod email;
pub mod webhook;

pub use chat::{ChatFlavor, ChatSender};
pub use email::{EmailSender, SmtpConfig};
pub use webhook::WebhookSender;

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("Failed to send notification: {0}")]
    SendFailed(String),
    #[error("Invalid configuration for sender: {0}")]
    InvalidConfiguration(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("Unsupported channel type: {0}")]
    UnsupportedChannel(String),
}

/// Sends one alert through one channel.
///
/// The channel's `config` blob is parsed by whichever sender handles its kind.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, channel: &NotificationChannel, alert: &Alert) -> Result<(), SenderError>;
}

/// Channel-agnostic rendering of an alert
#[derive(Debug, Clone, Serialize)]
pub struct AlertPayload {
    pub alert_id: String,
    pub monitor_id: String,
    pub kind: String,
    pub severity: String,
    pub message: String,
    pub created_at: String,
}

impl AlertPayload {
    pub fn from_alert(alert: &Alert) -> Self {
        Self {
            alert_id: alert.id.to_string(),
            monitor_id: alert.monitor_id.to_string(),
            kind: alert.kind.to_string(),
            severity: alert.severity.to_string(),
            message: alert.message.clone(),
            created_at: alert.created_at.to_rfc3339(),
        }
    }

    /// One-line summary, e.g. `[HIGH] Monitor api (https://api.example.com) is down`
    pub fn headline(&self) -> String {
        format!("[{}] {}", self.severity.to_uppercase(), self.message)
    }

    /// Multi-line plain text body
    pub fn text(&self) -> String {
        format!(
            "{}\n\nAlert: {}\nKind: {}\nMonitor: {}\nOpened at: {}",
            self.headline(),
            self.alert_id,
            self.kind,
            self.monitor_id,
            self.created_at
        )
    }
}

/// Routes each channel kind to its sender
pub struct ChannelNotifier {
    webhook: WebhookSender,
    slack: ChatSender,
    discord: ChatSender,
    email: Option<EmailSender>,
}

impl ChannelNotifier {
    /// `email` is `None` when no SMTP relay is configured; email channels then fail.
    pub fn new(client: reqwest::Client, email: Option<EmailSender>) -> Self {
        Self {
            webhook: WebhookSender::new(client.clone()),
            slack: ChatSender::new(client.clone(), ChatFlavor::Slack),
            discord: ChatSender::new(client, ChatFlavor::Discord),
            email,
        }
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn send(&self, channel: &NotificationChannel, alert: &Alert) -> Result<(), SenderError> {
        let payload = AlertPayload::from_alert(alert);

        match &channel.kind {
            ChannelKind::Webhook => self.webhook.send(&channel.config, &payload).await,
            ChannelKind::Slack => self.slack.send(&channel.config, &payload).await,
            ChannelKind::Discord => self.discord.send(&channel.config, &payload).await,
            ChannelKind::Email => match &self.email {
                Some(sender) => sender.send(&channel.config, &payload).await,
                None => Err(SenderError::InvalidConfiguration(
                    "SMTP relay is not configured".to_string(),
                )),
            },
            ChannelKind::Unsupported(kind) => Err(SenderError::UnsupportedChannel(kind.clone())),
        }
    }
}

/// Parse a channel's JSON config blob into the sender's config type
pub(crate) fn parse_config<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, SenderError> {
    serde_json::from_str(raw).map_err(|e| SenderError::InvalidConfiguration(e.to_string()))
}
