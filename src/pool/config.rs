//! Configuration for connection pools.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration_ms;
use crate::error::{PilumError, Result};
use crate::pool::retry::RetryPolicy;

/// Configuration for one connection pool.
///
/// Each external dependency (relational store, remote cache) gets its own
/// pool with its own configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Pool name used in logs, metrics and error messages.
    pub name: String,

    /// Maximum number of connections checked out or idle at once.
    pub max_size: usize,

    /// Number of connections opened eagerly by [`ConnectionPool::warm_up`].
    ///
    /// [`ConnectionPool::warm_up`]: crate::pool::ConnectionPool::warm_up
    pub min_idle: usize,

    /// How long `acquire` waits for a free slot before `PoolExhausted`.
    #[serde(with = "duration_ms")]
    pub acquire_timeout: Duration,

    /// Idle connections older than this are closed instead of reused.
    #[serde(with = "duration_ms")]
    pub idle_timeout: Duration,

    /// How long `shutdown` waits for outstanding connections to come back.
    #[serde(with = "duration_ms")]
    pub shutdown_grace: Duration,

    /// Number of recent errors kept by the pool metrics.
    pub error_log_capacity: usize,

    /// Retry policy for establishing new connections.
    pub retry: RetryPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_size: 20,
            min_idle: 0,
            acquire_timeout: Duration::from_secs(2),
            idle_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
            error_log_capacity: 100,
            retry: RetryPolicy::default(),
        }
    }
}

impl PoolConfig {
    /// Create a configuration with defaults and the given pool name.
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the maximum pool size.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the number of eagerly opened connections.
    pub fn with_min_idle(mut self, min_idle: usize) -> Self {
        self.min_idle = min_idle;
        self
    }

    /// Set the acquire timeout.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set the connection retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(PilumError::invalid_config(format!(
                "pool '{}': max_size must be greater than 0",
                self.name
            )));
        }

        if self.min_idle > self.max_size {
            return Err(PilumError::invalid_config(format!(
                "pool '{}': min_idle ({}) exceeds max_size ({})",
                self.name, self.min_idle, self.max_size
            )));
        }

        if self.acquire_timeout.is_zero() {
            return Err(PilumError::invalid_config(format!(
                "pool '{}': acquire_timeout must be non-zero",
                self.name
            )));
        }

        if self.error_log_capacity == 0 {
            return Err(PilumError::invalid_config(format!(
                "pool '{}': error_log_capacity must be greater than 0",
                self.name
            )));
        }

        self.retry.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.max_size, 20);
        assert_eq!(config.acquire_timeout, Duration::from_secs(2));
        assert_eq!(config.error_log_capacity, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_sizes() {
        assert!(PoolConfig::new("pg").with_max_size(0).validate().is_err());
        assert!(
            PoolConfig::new("pg")
                .with_max_size(2)
                .with_min_idle(3)
                .validate()
                .is_err()
        );
        assert!(
            PoolConfig::new("pg")
                .with_acquire_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_serde_uses_milliseconds() {
        let config: PoolConfig =
            serde_json::from_str(r#"{"name":"redis","max_size":4,"acquire_timeout":250}"#)
                .unwrap();
        assert_eq!(config.name, "redis");
        assert_eq!(config.max_size, 4);
        assert_eq!(config.acquire_timeout, Duration::from_millis(250));
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
    }
}
