use lettre::message::{Mailbox, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{AlertPayload, SenderError, parse_config};

/// `[notifications.smtp]` section of the service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    /// Upgrade with STARTTLS; disable for local relays such as MailHog
    #[serde(default = "default_starttls")]
    pub starttls: bool,
}

fn default_starttls() -> bool {
    true
}

/// `config` blob of an email channel: one address or a comma separated list
#[derive(Debug, Clone, Deserialize)]
pub struct EmailChannelConfig {
    pub to: String,
}

/// Plain-text alert emails over SMTP
pub struct EmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailSender {
    pub fn new(config: &SmtpConfig, timeout: Duration) -> Result<Self, SenderError> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| SenderError::InvalidConfiguration(format!("Invalid from address: {}", e)))?;

        let builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| SenderError::InvalidConfiguration(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };

        let mut builder = builder.port(config.port).timeout(Some(timeout));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self { transport: builder.build(), from })
    }

    pub async fn send(&self, raw_config: &str, payload: &AlertPayload) -> Result<(), SenderError> {
        let config: EmailChannelConfig = parse_config(raw_config)?;
        let message = build_message(&self.from, &config, payload)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| SenderError::SendFailed(e.to_string()))?;
        Ok(())
    }
}

fn build_message(from: &Mailbox, config: &EmailChannelConfig, payload: &AlertPayload) -> Result<Message, SenderError> {
    let mut builder = Message::builder().from(from.clone()).subject(payload.headline());

    let mut recipients = 0;
    for address in config.to.split(',').map(str::trim).filter(|a| !a.is_empty()) {
        let mailbox: Mailbox = address
            .parse()
            .map_err(|e| SenderError::InvalidConfiguration(format!("Invalid recipient {}: {}", address, e)))?;
        builder = builder.to(mailbox);
        recipients += 1;
    }
    if recipients == 0 {
        return Err(SenderError::InvalidConfiguration("Email channel has no recipients".to_string()));
    }

    builder
        .header(ContentType::TEXT_PLAIN)
        .body(payload.text())
        .map_err(|e| SenderError::InvalidConfiguration(e.to_string()))
}
