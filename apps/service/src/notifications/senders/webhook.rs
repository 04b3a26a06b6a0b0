use reqwest::{Client, Method, header};
use serde::Deserialize;
use std::collections::HashMap;

use super::{AlertPayload, SenderError, parse_config};

/// `config` blob of a generic webhook channel
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_method() -> String {
    "POST".to_string()
}

/// A sender for pushing alerts as JSON to a custom webhook.
pub struct WebhookSender {
    client: Client,
}

impl WebhookSender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn send(&self, raw_config: &str, payload: &AlertPayload) -> Result<(), SenderError> {
        let config: WebhookConfig = parse_config(raw_config)?;

        let method = match config.method.to_uppercase().as_str() {
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            other => {
                return Err(SenderError::InvalidConfiguration(format!(
                    "Unsupported HTTP method: {}",
                    other
                )));
            }
        };

        let mut header_map = header::HeaderMap::new();
        for (key, value) in &config.headers {
            let name = header::HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| SenderError::InvalidConfiguration(format!("Invalid header name: {}", e)))?;
            let value = header::HeaderValue::from_str(value)
                .map_err(|e| SenderError::InvalidConfiguration(format!("Invalid header value: {}", e)))?;
            header_map.insert(name, value);
        }

        let response = self
            .client
            .request(method, &config.url)
            .headers(header_map)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SenderError::SendFailed(format!(
                "Webhook returned non-success status: {}",
                status
            )));
        }

        Ok(())
    }
}
