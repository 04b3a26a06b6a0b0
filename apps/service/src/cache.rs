//! Latest observed status per monitor, with a bounded lifetime.
//!
//! The cache is a read path layered over the check history, never a source of
//! truth: a miss means "unknown", not "down".

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::monitoring::types::CheckState;

/// Default lifetime of a cached status
pub const DEFAULT_STATUS_TTL: Duration = Duration::from_secs(3600);

/// Cached view of a monitor's most recent check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedStatus {
    pub state: CheckState,
    pub latency_ms: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Entry {
    status: CachedStatus,
    expires_at: Instant,
}

/// Concurrent TTL cache keyed by monitor id (sharded locking via `DashMap`)
#[derive(Debug)]
pub struct StatusCache {
    entries: DashMap<Uuid, Entry>,
    ttl: Duration,
}

impl Default for StatusCache {
    fn default() -> Self {
        Self::new(DEFAULT_STATUS_TTL)
    }
}

impl StatusCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: DashMap::new(), ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store the latest status; the TTL starts now
    pub fn put(&self, monitor_id: Uuid, state: CheckState, latency_ms: u64) {
        self.put_at(monitor_id, state, latency_ms, Utc::now());
    }

    /// Store a status observed at `updated_at`. The TTL still starts now.
    pub fn put_at(&self, monitor_id: Uuid, state: CheckState, latency_ms: u64, updated_at: DateTime<Utc>) {
        let entry = Entry {
            status: CachedStatus { state, latency_ms, updated_at },
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.insert(monitor_id, entry);
    }

    /// Cached status, or `None` if absent or expired
    pub fn get(&self, monitor_id: Uuid) -> Option<CachedStatus> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(&monitor_id) {
            if entry.expires_at > now {
                return Some(entry.status.clone());
            }
        }

        // Expired: drop it unless a writer replaced it in the meantime
        self.entries.remove_if(&monitor_id, |_, entry| entry.expires_at <= now);
        None
    }

    pub fn invalidate(&self, monitor_id: Uuid) {
        self.entries.remove(&monitor_id);
    }

    /// Number of entries, expired ones included until they are read
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
