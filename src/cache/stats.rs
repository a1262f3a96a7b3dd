//! Cache statistics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::cache::breaker::CircuitState;

/// Atomic counters updated on every cache operation.
#[derive(Debug, Default)]
pub struct CacheCounters {
    local_hits: AtomicU64,
    remote_hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    invalidations: AtomicU64,
    remote_errors: AtomicU64,
}

impl CacheCounters {
    pub fn record_local_hit(&self) {
        self.local_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_remote_hit(&self) {
        self.remote_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_hit(&self) {
        self.stale_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deletes(&self, count: u64) {
        self.deletes.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_remote_error(&self) {
        self.remote_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Fraction of lookups that returned a value.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    fn hits(&self) -> u64 {
        self.local_hits.load(Ordering::Relaxed)
            + self.remote_hits.load(Ordering::Relaxed)
            + self.stale_hits.load(Ordering::Relaxed)
    }

    /// Combine the counters with tier and breaker information.
    pub fn snapshot(
        &self,
        local_entries: usize,
        local_bytes: usize,
        evictions: u64,
        breaker: CircuitState,
    ) -> CacheStats {
        CacheStats {
            hits: self.hits(),
            local_hits: self.local_hits.load(Ordering::Relaxed),
            remote_hits: self.remote_hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            hit_rate: self.hit_rate(),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            remote_errors: self.remote_errors.load(Ordering::Relaxed),
            local_entries,
            local_bytes,
            evictions,
            breaker,
        }
    }
}

/// Snapshot returned by [`CacheManager::stats`](crate::cache::CacheManager::stats).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub local_hits: u64,
    pub remote_hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub sets: u64,
    pub deletes: u64,
    pub invalidations: u64,
    pub remote_errors: u64,
    pub local_entries: usize,
    pub local_bytes: usize,
    pub evictions: u64,
    pub breaker: CircuitState,
}
