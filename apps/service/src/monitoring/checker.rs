use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::{self, RootCertStore, pki_types::ServerName};
use tracing::{debug, warn};
use url::Url;

use super::types::ProbeResult;
use crate::database::models::Monitor;

/// Largest response body excerpt kept on a check record
pub const RESPONSE_EXCERPT_LIMIT: usize = 1024;

/// Certificates expiring closer than this are reported as `warning`
pub const CERTIFICATE_WARNING_DAYS: i64 = 30;

/// Checker trait for the different kinds of monitoring checks.
///
/// Implementations never fail: transport problems are reported as a `down`
/// probe with the error text as diagnostic.
#[async_trait::async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, monitor: &Monitor) -> ProbeResult;
}

/// HTTP reachability checker
pub struct HttpChecker {
    client: reqwest::Client,
}

impl HttpChecker {
    pub fn new() -> Result<Self> {
        // Per-request timeouts come from the monitor, so the client itself is unbounded.
        let client = reqwest::Client::builder()
            .user_agent(concat!("vigil/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Checker for HttpChecker {
    async fn check(&self, monitor: &Monitor) -> ProbeResult {
        let mut request = self
            .client
            .get(&monitor.target)
            .timeout(Duration::from_secs(monitor.timeout_seconds));

        for (name, value) in &monitor.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return ProbeResult::unreachable(e.to_string()),
        };

        let status_code = response.status().as_u16();
        let body = match read_excerpt(response, RESPONSE_EXCERPT_LIMIT).await {
            Ok(text) => Some(text),
            Err(e) => {
                debug!(monitor_id = %monitor.id, "Failed to read response body: {}", e);
                None
            }
        };

        let probe = if status_code == monitor.expected_status {
            ProbeResult::up(status_code)
        } else {
            ProbeResult::down(
                status_code,
                format!("expected status {}, got {}", monitor.expected_status, status_code),
            )
        };

        probe.with_body(body)
    }
}

/// Webhook delivery checker.
///
/// Performs the same request as [`HttpChecker`] and drops the body; a real
/// delivery verification does not exist yet.
pub struct DeliveryProbeChecker {
    http: Arc<HttpChecker>,
}

impl DeliveryProbeChecker {
    pub fn new(http: Arc<HttpChecker>) -> Self {
        Self { http }
    }
}

#[async_trait::async_trait]
impl Checker for DeliveryProbeChecker {
    async fn check(&self, monitor: &Monitor) -> ProbeResult {
        self.http.check(monitor).await.with_body(None)
    }
}

/// TLS certificate expiry checker
pub struct CertificateChecker {
    connector: TlsConnector,
}

impl CertificateChecker {
    pub fn new() -> Result<Self> {
        let mut roots = RootCertStore::empty();
        let native = rustls_native_certs::load_native_certs();
        for error in &native.errors {
            warn!("Failed to load a native root certificate: {}", error);
        }
        let (added, ignored) = roots.add_parsable_certificates(native.certs);
        debug!(added, ignored, "Loaded native root certificates");

        if roots.is_empty() {
            return Err(anyhow!("No usable root certificates found on this system"));
        }

        Ok(Self::with_roots(roots))
    }

    /// Build a checker that trusts only `roots`
    pub fn with_roots(roots: RootCertStore) -> Self {
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Self { connector: TlsConnector::from(Arc::new(config)) }
    }

    /// Handshake with the target and return the leaf certificate's `notAfter`
    async fn leaf_expiry(&self, host: &str, port: u16) -> Result<DateTime<Utc>> {
        let stream = TcpStream::connect((host, port))
            .await
            .with_context(|| format!("TCP connection to {}:{} failed", host, port))?;

        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| anyhow!("Invalid server name {}: {}", host, e))?;

        let tls = self
            .connector
            .connect(server_name, stream)
            .await
            .context("TLS handshake failed")?;

        let (_, session) = tls.get_ref();
        let leaf = session
            .peer_certificates()
            .and_then(|certs| certs.first())
            .ok_or_else(|| anyhow!("Server presented no certificate"))?;

        let (_, certificate) = x509_parser::parse_x509_certificate(leaf.as_ref())
            .map_err(|e| anyhow!("Failed to parse leaf certificate: {}", e))?;

        let not_after = certificate.validity().not_after.timestamp();
        DateTime::from_timestamp(not_after, 0)
            .ok_or_else(|| anyhow!("Certificate expiry {} is out of range", not_after))
    }
}

#[async_trait::async_trait]
impl Checker for CertificateChecker {
    async fn check(&self, monitor: &Monitor) -> ProbeResult {
        let (host, port) = match tls_endpoint(&monitor.target) {
            Ok(endpoint) => endpoint,
            Err(e) => return ProbeResult::unreachable(e.to_string()),
        };

        let limit = Duration::from_secs(monitor.timeout_seconds);
        match timeout(limit, self.leaf_expiry(&host, port)).await {
            Ok(Ok(not_after)) => classify_expiry(not_after, Utc::now()),
            Ok(Err(e)) => ProbeResult::unreachable(format!("{:#}", e)),
            Err(_) => ProbeResult::unreachable(format!(
                "TLS check timed out after {}s",
                monitor.timeout_seconds
            )),
        }
    }
}

/// Map a leaf certificate expiry to a probe, relative to `now`
pub fn classify_expiry(not_after: DateTime<Utc>, now: DateTime<Utc>) -> ProbeResult {
    let remaining = not_after - now;

    if remaining < chrono::Duration::days(CERTIFICATE_WARNING_DAYS) {
        ProbeResult::warning(format!(
            "certificate expires in {} days (at {})",
            remaining.num_days(),
            not_after.to_rfc3339()
        ))
    } else {
        ProbeResult::up(0)
    }
}

/// Resolve a certificate target (`host`, `host:port` or `https://host[:port]/...`)
pub fn tls_endpoint(target: &str) -> Result<(String, u16)> {
    if target.contains("://") {
        let url = Url::parse(target).map_err(|e| anyhow!("Invalid URL: {}", e))?;
        let host = url.host_str().ok_or_else(|| anyhow!("URL has no host: {}", target))?;
        let port = url.port_or_known_default().unwrap_or(443);
        return Ok((host.trim_matches(['[', ']']).to_string(), port));
    }

    match target.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !host.ends_with(':') => {
            let port = port.parse::<u16>().map_err(|_| anyhow!("Invalid port in target: {}", target))?;
            Ok((host.trim_matches(['[', ']']).to_string(), port))
        }
        _ if target.is_empty() => Err(anyhow!("Empty certificate target")),
        _ => Ok((target.to_string(), 443)),
    }
}

/// Read at most `limit` bytes of the body, leaving the rest unread
async fn read_excerpt(mut response: reqwest::Response, limit: usize) -> reqwest::Result<String> {
    let mut buf = Vec::new();
    while buf.len() < limit {
        let Some(chunk) = response.chunk().await? else {
            break;
        };
        let take = chunk.len().min(limit - buf.len());
        buf.extend_from_slice(&chunk[..take]);
    }

    Ok(excerpt(&String::from_utf8_lossy(&buf), limit))
}

/// Cut `text` to at most `limit` bytes without splitting a character
fn excerpt(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
