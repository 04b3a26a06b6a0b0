//! Rules a monitor must satisfy before it is scheduled.

use reqwest::header::{HeaderName, HeaderValue};
use thiserror::Error;
use url::Url;

use super::checker::tls_endpoint;
use crate::database::models::{Monitor, MonitorKind};

pub const MIN_INTERVAL_SECONDS: u64 = 30;
pub const MAX_INTERVAL_SECONDS: u64 = 86400; // 24 hours
pub const MIN_TIMEOUT_SECONDS: u64 = 5;
pub const MAX_TIMEOUT_SECONDS: u64 = 300; // 5 minutes

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Monitor name cannot be empty")]
    EmptyName,
    #[error("Check interval too short: {0} seconds (minimum: {min})", min = MIN_INTERVAL_SECONDS)]
    IntervalTooShort(u64),
    #[error("Check interval too long: {0} seconds (maximum: {max})", max = MAX_INTERVAL_SECONDS)]
    IntervalTooLong(u64),
    #[error("Timeout too short: {0} seconds (minimum: {min})", min = MIN_TIMEOUT_SECONDS)]
    TimeoutTooShort(u64),
    #[error("Timeout too long: {0} seconds (maximum: {max})", max = MAX_TIMEOUT_SECONDS)]
    TimeoutTooLong(u64),
    #[error("Expected status {0} is not an HTTP status code")]
    InvalidExpectedStatus(u16),
    #[error("Unsupported monitor type: {0}")]
    UnsupportedKind(String),
    #[error("Invalid target: {0}")]
    InvalidTarget(String),
    #[error("Invalid header '{0}'")]
    InvalidHeader(String),
}

/// Validate every field the engine depends on
pub fn validate_monitor(monitor: &Monitor) -> Result<(), ValidationError> {
    if monitor.name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    validate_check_interval(monitor.interval_seconds)?;
    validate_timeout(monitor.timeout_seconds)?;

    if !(100..=599).contains(&monitor.expected_status) {
        return Err(ValidationError::InvalidExpectedStatus(monitor.expected_status));
    }

    validate_target(&monitor.kind, &monitor.target)?;

    for (name, value) in &monitor.headers {
        if HeaderName::from_bytes(name.as_bytes()).is_err() || HeaderValue::from_str(value).is_err() {
            return Err(ValidationError::InvalidHeader(name.clone()));
        }
    }

    Ok(())
}

pub fn validate_check_interval(interval_seconds: u64) -> Result<(), ValidationError> {
    if interval_seconds < MIN_INTERVAL_SECONDS {
        return Err(ValidationError::IntervalTooShort(interval_seconds));
    }
    if interval_seconds > MAX_INTERVAL_SECONDS {
        return Err(ValidationError::IntervalTooLong(interval_seconds));
    }
    Ok(())
}

pub fn validate_timeout(timeout_seconds: u64) -> Result<(), ValidationError> {
    if timeout_seconds < MIN_TIMEOUT_SECONDS {
        return Err(ValidationError::TimeoutTooShort(timeout_seconds));
    }
    if timeout_seconds > MAX_TIMEOUT_SECONDS {
        return Err(ValidationError::TimeoutTooLong(timeout_seconds));
    }
    Ok(())
}

/// Validate a target against what its checker can dial
pub fn validate_target(kind: &MonitorKind, target: &str) -> Result<(), ValidationError> {
    if target.trim().is_empty() {
        return Err(ValidationError::InvalidTarget("target cannot be empty".to_string()));
    }

    match kind {
        MonitorKind::Reachability | MonitorKind::DeliveryProbe => validate_http_endpoint(target),
        MonitorKind::CertificateExpiry => tls_endpoint(target)
            .map(|_| ())
            .map_err(|e| ValidationError::InvalidTarget(e.to_string())),
        MonitorKind::Unrecognized(other) => Err(ValidationError::UnsupportedKind(other.clone())),
    }
}

fn validate_http_endpoint(target: &str) -> Result<(), ValidationError> {
    let url = match Url::parse(target) {
        Ok(url) => url,
        Err(_) if !target.contains("://") => {
            return Err(ValidationError::InvalidTarget(
                "URL must include scheme (http:// or https://)".to_string(),
            ));
        }
        Err(e) => return Err(ValidationError::InvalidTarget(format!("Invalid URL: {e}"))),
    };

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ValidationError::InvalidTarget(format!(
                "Invalid scheme '{other}'. Must be http or https"
            )));
        }
    }

    if url.host_str().is_none() {
        return Err(ValidationError::InvalidTarget("URL must have a valid host".to_string()));
    }

    Ok(())
}
