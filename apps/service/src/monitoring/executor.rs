use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use super::checker::{CertificateChecker, Checker, DeliveryProbeChecker, HttpChecker};
use super::types::{CheckOutcome, ProbeResult};
use crate::database::models::{Monitor, MonitorKind};

/// Monitoring executor - picks the checker for a monitor's kind and times it
pub struct MonitoringExecutor {
    checkers: HashMap<MonitorKind, Arc<dyn Checker>>,
}

impl MonitoringExecutor {
    /// Create an executor with the network checkers for every known kind
    pub fn new() -> Result<Self> {
        let http = Arc::new(HttpChecker::new()?);

        Ok(Self::empty()
            .with_checker(MonitorKind::Reachability, http.clone())
            .with_checker(MonitorKind::DeliveryProbe, Arc::new(DeliveryProbeChecker::new(http)))
            .with_checker(MonitorKind::CertificateExpiry, Arc::new(CertificateChecker::new()?)))
    }

    /// An executor with no checkers; every kind evaluates to `unknown`
    pub fn empty() -> Self {
        Self { checkers: HashMap::new() }
    }

    /// Register (or replace) the checker used for `kind`
    pub fn with_checker(mut self, kind: MonitorKind, checker: Arc<dyn Checker>) -> Self {
        self.checkers.insert(kind, checker);
        self
    }

    /// Evaluate a monitor once.
    ///
    /// Latency covers the whole checker call, I/O included.
    pub async fn execute_check(&self, monitor: &Monitor) -> CheckOutcome {
        let start = Instant::now();

        let probe = match self.checkers.get(&monitor.kind) {
            Some(checker) => checker.check(monitor).await,
            None => ProbeResult::unknown(format!("unknown monitor kind: {}", monitor.kind)),
        };

        let latency_ms = start.elapsed().as_millis() as u64;
        debug!(
            monitor_id = %monitor.id,
            kind = %monitor.kind,
            state = %probe.state,
            latency_ms,
            "Check evaluated"
        );

        CheckOutcome::from_probe(probe, latency_ms)
    }
}
