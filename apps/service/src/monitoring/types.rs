use serde::{Deserialize, Serialize};

/// Health state produced by one check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckState {
    Up,
    Down,
    Warning,
    Unknown,
}

impl CheckState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckState::Up => "up",
            CheckState::Down => "down",
            CheckState::Warning => "warning",
            CheckState::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "up" => CheckState::Up,
            "down" => CheckState::Down,
            "warning" => CheckState::Warning,
            _ => CheckState::Unknown,
        }
    }
}

impl std::fmt::Display for CheckState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a checker observed, before the executor stamps the latency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub state: CheckState,
    /// Protocol status code, 0 if not applicable
    pub status_code: u16,
    pub diagnostic: Option<String>,
    pub body: Option<String>,
}

impl ProbeResult {
    /// Target answered as expected
    pub fn up(status_code: u16) -> Self {
        Self { state: CheckState::Up, status_code, diagnostic: None, body: None }
    }

    /// Target answered, but not as expected
    pub fn down(status_code: u16, diagnostic: impl Into<String>) -> Self {
        Self {
            state: CheckState::Down,
            status_code,
            diagnostic: Some(diagnostic.into()),
            body: None,
        }
    }

    /// Target could not be reached at all (DNS, connect, TLS, timeout)
    pub fn unreachable(error: impl Into<String>) -> Self {
        Self::down(0, error)
    }

    pub fn warning(diagnostic: impl Into<String>) -> Self {
        Self {
            state: CheckState::Warning,
            status_code: 0,
            diagnostic: Some(diagnostic.into()),
            body: None,
        }
    }

    pub fn unknown(diagnostic: impl Into<String>) -> Self {
        Self {
            state: CheckState::Unknown,
            status_code: 0,
            diagnostic: Some(diagnostic.into()),
            body: None,
        }
    }

    pub fn with_body(mut self, body: Option<String>) -> Self {
        self.body = body;
        self
    }
}

/// Outcome of one evaluation: the probe plus wall-clock latency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub state: CheckState,
    pub latency_ms: u64,
    pub status_code: u16,
    pub diagnostic: Option<String>,
    pub body: Option<String>,
}

impl CheckOutcome {
    pub fn from_probe(probe: ProbeResult, latency_ms: u64) -> Self {
        Self {
            state: probe.state,
            latency_ms,
            status_code: probe.status_code,
            diagnostic: probe.diagnostic,
            body: probe.body,
        }
    }
}
