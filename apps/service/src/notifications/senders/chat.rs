use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{AlertPayload, SenderError, parse_config};

/// Incoming-webhook chat services differ only in the message field name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatFlavor {
    Slack,
    Discord,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    pub webhook_url: String,
}

/// Posts a plain-text alert to a Slack or Discord incoming webhook
pub struct ChatSender {
    client: Client,
    flavor: ChatFlavor,
}

impl ChatSender {
    pub fn new(client: Client, flavor: ChatFlavor) -> Self {
        Self { client, flavor }
    }

    pub async fn send(&self, raw_config: &str, payload: &AlertPayload) -> Result<(), SenderError> {
        let config: ChatConfig = parse_config(raw_config)?;

        let body = match self.flavor {
            ChatFlavor::Slack => json!({ "text": payload.text() }),
            ChatFlavor::Discord => json!({ "content": payload.text() }),
        };

        let response = self.client.post(&config.webhook_url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(SenderError::SendFailed(format!(
                "{:?} webhook returned {}: {}",
                self.flavor, status, error_body
            )));
        }

        Ok(())
    }
}
