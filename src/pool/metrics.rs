//! Metrics collection for connection pools.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Number of recent errors included in a [`PoolStats`] snapshot.
const RECENT_ERRORS_IN_SNAPSHOT: usize = 10;

/// One entry of the pool error log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// When the error was recorded.
    pub timestamp: DateTime<Utc>,
    /// Error message.
    pub message: String,
}

/// Point-in-time view of a pool's metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    /// Physical connections opened.
    pub connections: u64,
    /// Successful acquisitions.
    pub acquisitions: u64,
    /// Releases back to the pool.
    pub releases: u64,
    /// Connections closed (idle expiry, broken, shutdown).
    pub removals: u64,
    /// Errors recorded.
    pub errors: u64,
    /// Average time callers waited in `acquire`, in milliseconds.
    pub avg_wait_ms: f64,
    /// Average time a connection was held before release, in milliseconds.
    pub avg_hold_ms: f64,
    /// Connections currently checked out.
    pub active: u64,
    /// Connections currently idle in the pool.
    pub idle: usize,
    /// Most recent errors, oldest first.
    pub recent_errors: Vec<ErrorRecord>,
}

/// Thread-safe collector for pool events.
///
/// Counters are atomics; the error log is a bounded ring buffer that keeps
/// only the most recent `capacity` entries.
#[derive(Debug)]
pub struct PoolMetrics {
    connections: AtomicU64,
    acquisitions: AtomicU64,
    releases: AtomicU64,
    removals: AtomicU64,
    errors: AtomicU64,
    total_wait_nanos: AtomicU64,
    total_hold_nanos: AtomicU64,
    error_log: Mutex<VecDeque<ErrorRecord>>,
    capacity: usize,
}

impl PoolMetrics {
    /// Create a collector whose error log holds `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            connections: AtomicU64::new(0),
            acquisitions: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            removals: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            total_wait_nanos: AtomicU64::new(0),
            total_hold_nanos: AtomicU64::new(0),
            error_log: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    /// Record a newly opened physical connection.
    pub fn record_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful acquisition and how long the caller waited.
    pub fn record_acquisition(&self, wait: Duration) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        self.total_wait_nanos
            .fetch_add(wait.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Record a release and how long the connection was held.
    pub fn record_release(&self, held: Duration) {
        self.releases.fetch_add(1, Ordering::Relaxed);
        self.total_hold_nanos
            .fetch_add(held.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Record a closed connection.
    pub fn record_removal(&self) {
        self.removals.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an error in the counters and the ring buffer.
    pub fn record_error(&self, message: impl Into<String>) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        let mut log = self.error_log.lock();
        if log.len() == self.capacity {
            log.pop_front();
        }
        log.push_back(ErrorRecord {
            timestamp: Utc::now(),
            message: message.into(),
        });
    }

    /// All errors currently held in the ring buffer, oldest first.
    pub fn error_log(&self) -> Vec<ErrorRecord> {
        self.error_log.lock().iter().cloned().collect()
    }

    /// Snapshot the counters. `idle` is supplied by the pool.
    pub fn snapshot(&self, idle: usize) -> PoolStats {
        let acquisitions = self.acquisitions.load(Ordering::Relaxed);
        let releases = self.releases.load(Ordering::Relaxed);
        let wait = self.total_wait_nanos.load(Ordering::Relaxed);
        let hold = self.total_hold_nanos.load(Ordering::Relaxed);

        let log = self.error_log.lock();
        let skip = log.len().saturating_sub(RECENT_ERRORS_IN_SNAPSHOT);
        let recent_errors = log.iter().skip(skip).cloned().collect();

        PoolStats {
            connections: self.connections.load(Ordering::Relaxed),
            acquisitions,
            releases,
            removals: self.removals.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            avg_wait_ms: average_millis(wait, acquisitions),
            avg_hold_ms: average_millis(hold, releases),
            active: acquisitions.saturating_sub(releases),
            idle,
            recent_errors,
        }
    }

    /// Reset every counter and clear the error log.
    pub fn reset(&self) {
        for counter in [
            &self.connections,
            &self.acquisitions,
            &self.releases,
            &self.removals,
            &self.errors,
            &self.total_wait_nanos,
            &self.total_hold_nanos,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.error_log.lock().clear();
    }
}

fn average_millis(total_nanos: u64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total_nanos as f64 / count as f64 / 1_000_000.0
    }
}
