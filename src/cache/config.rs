//! Configuration for the tiered cache and its circuit breaker.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration_ms;
use crate::error::{PilumError, Result};

/// Circuit breaker thresholds for the remote tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again.
    pub success_threshold: u32,
    /// How long the circuit stays open before a probe is allowed.
    #[serde(with = "duration_ms")]
    pub reset_timeout: Duration,
    /// Deadline for a single protected call; expiry counts as a failure.
    #[serde(with = "duration_ms")]
    pub call_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            reset_timeout: Duration::from_secs(30),
            call_timeout: Duration::from_secs(2),
        }
    }
}

impl BreakerConfig {
    /// Set the failure threshold.
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the success threshold.
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Set the open-state cool-down.
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Set the per-call deadline.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 || self.success_threshold == 0 {
            return Err(PilumError::invalid_config(
                "breaker thresholds must be greater than 0",
            ));
        }
        if self.call_timeout.is_zero() {
            return Err(PilumError::invalid_config(
                "breaker call_timeout must be non-zero",
            ));
        }
        Ok(())
    }
}

/// Configuration for [`CacheManager`](crate::cache::CacheManager).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Prefix of every generated key.
    pub key_prefix: String,

    /// TTL used when the caller does not pass one.
    #[serde(with = "duration_ms")]
    pub default_ttl: Duration,

    /// Longer TTLs are clamped to this.
    #[serde(with = "duration_ms")]
    pub max_ttl: Duration,

    /// Upper bound on how long a copy lives in the local tier.
    #[serde(with = "duration_ms")]
    pub local_ttl: Duration,

    /// Maximum number of local entries.
    pub local_max_entries: usize,

    /// Maximum approximate size of the local tier in bytes.
    pub local_max_bytes: usize,

    /// Maximum number of pending invalidations kept for an unreachable
    /// remote tier.
    pub max_tombstones: usize,

    /// Circuit breaker guarding the remote tier.
    pub breaker: BreakerConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: "pilum".to_string(),
            default_ttl: Duration::from_secs(3600),
            max_ttl: Duration::from_secs(24 * 3600),
            local_ttl: Duration::from_secs(300),
            local_max_entries: 1000,
            local_max_bytes: 50 * 1024 * 1024,
            max_tombstones: 256,
            breaker: BreakerConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Set the key prefix.
    pub fn with_key_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the default TTL.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the local copy TTL cap.
    pub fn with_local_ttl(mut self, ttl: Duration) -> Self {
        self.local_ttl = ttl;
        self
    }

    /// Set the local tier capacity.
    pub fn with_local_capacity(mut self, max_entries: usize, max_bytes: usize) -> Self {
        self.local_max_entries = max_entries;
        self.local_max_bytes = max_bytes;
        self
    }

    /// Set the breaker configuration.
    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Clamp a requested TTL to `max_ttl`. `None` means the default TTL.
    pub fn effective_ttl(&self, ttl: Option<Duration>) -> Duration {
        ttl.unwrap_or(self.default_ttl).min(self.max_ttl)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.key_prefix.is_empty() || self.key_prefix.contains(':') {
            return Err(PilumError::invalid_config(
                "cache key_prefix must be non-empty and must not contain ':'",
            ));
        }
        if self.local_max_entries == 0 || self.local_max_bytes == 0 {
            return Err(PilumError::invalid_config(
                "cache local tier capacity must be greater than 0",
            ));
        }
        if self.default_ttl.is_zero() || self.default_ttl > self.max_ttl {
            return Err(PilumError::invalid_config(format!(
                "cache default_ttl must be in (0, {}ms]",
                self.max_ttl.as_millis()
            )));
        }
        self.breaker.validate()
    }
}
