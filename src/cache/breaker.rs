//! Circuit breaker guarding a flaky dependency.
//!
//! All state transitions happen under one mutex that is never held across
//! an `.await`. Callers only see [`CircuitBreaker::execute`],
//! [`CircuitBreaker::state`] and a read-only [`BreakerStatus`].
//!
//! ```text
//!   Closed --(failure_threshold consecutive failures)--> Open
//!   Open   --(reset_timeout elapsed)-------------------> HalfOpen
//!   HalfOpen --(success_threshold probe successes)-----> Closed
//!   HalfOpen --(any probe failure)---------------------> Open
//! ```
//!
//! In half-open state exactly one probe call is in flight at a time; every
//! other call fails fast until the probe settles.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::cache::config::BreakerConfig;
use crate::error::{PilumError, Result};
use crate::metrics::{MetricsSink, NoopMetrics};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn gauge_value(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

/// Read-only snapshot of a breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerStatus {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    probe_in_flight: bool,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
            last_failure_at: None,
            last_error: None,
            probe_in_flight: false,
        }
    }
}

/// Clears the probe slot if the probe call is dropped before it settles.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!("breaker '{}': probe cancelled", self.breaker.name);
            self.breaker.state.lock().probe_in_flight = false;
        }
    }
}

/// A circuit breaker shared by every caller of one dependency.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    state: Mutex<BreakerState>,
    sink: Arc<dyn MetricsSink>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new<S: Into<String>>(name: S, config: BreakerConfig) -> Self {
        Self::with_metrics_sink(name, config, Arc::new(NoopMetrics))
    }

    /// Create a closed breaker that reports transitions to `sink`.
    pub fn with_metrics_sink<S: Into<String>>(
        name: S,
        config: BreakerConfig,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState::closed()),
            sink,
        }
    }

    /// Breaker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Breaker configuration.
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state. An open breaker whose cool-down has elapsed reports
    /// (and becomes) half-open.
    pub fn state(&self) -> CircuitState {
        let mut state = self.state.lock();
        self.maybe_half_open(&mut state);
        state.state
    }

    /// Snapshot of the breaker.
    pub fn status(&self) -> BreakerStatus {
        let mut state = self.state.lock();
        self.maybe_half_open(&mut state);
        BreakerStatus {
            name: self.name.clone(),
            state: state.state,
            failure_count: state.failure_count,
            success_count: state.success_count,
            last_failure_at: state.last_failure_at,
            last_error: state.last_error.clone(),
        }
    }

    /// Force the breaker closed and clear its counters.
    pub fn reset(&self) {
        *self.state.lock() = BreakerState::closed();
        info!("breaker '{}': reset to closed", self.name);
        self.sink
            .gauge("cache.breaker.state", CircuitState::Closed.gauge_value());
    }

    /// Run `call` through the breaker.
    ///
    /// While open the call is not attempted and `CacheUnavailable` is
    /// returned immediately. The call runs under `call_timeout`; expiry
    /// counts as a failure and yields `Timeout`.
    pub async fn execute<T, F, Fut>(&self, call: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut probe = self.enter()?;

        let outcome = tokio::time::timeout(self.config.call_timeout, call()).await;
        let is_probe = probe.as_ref().is_some_and(|guard| guard.armed);
        if let Some(guard) = probe.as_mut() {
            guard.armed = false;
        }

        match outcome {
            Ok(Ok(value)) => {
                self.on_success(is_probe);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.on_failure(is_probe, e.to_string());
                Err(e)
            }
            Err(_) => {
                let message = format!(
                    "breaker '{}': call exceeded {}ms",
                    self.name,
                    self.config.call_timeout.as_millis()
                );
                self.on_failure(is_probe, message.clone());
                Err(PilumError::timeout(message))
            }
        }
    }

    fn maybe_half_open(&self, state: &mut BreakerState) {
        if state.state != CircuitState::Open {
            return;
        }
        let cooled_down = state
            .opened_at
            .is_some_and(|at| at.elapsed() >= self.config.reset_timeout);
        if cooled_down {
            state.state = CircuitState::HalfOpen;
            state.success_count = 0;
            state.probe_in_flight = false;
            info!("breaker '{}': half-open, probing", self.name);
            self.sink
                .gauge("cache.breaker.state", CircuitState::HalfOpen.gauge_value());
        }
    }

    fn enter(&self) -> Result<Option<ProbeGuard<'_>>> {
        let mut state = self.state.lock();
        self.maybe_half_open(&mut state);
        match state.state {
            CircuitState::Closed => Ok(None),
            CircuitState::HalfOpen if !state.probe_in_flight => {
                state.probe_in_flight = true;
                Ok(Some(ProbeGuard {
                    breaker: self,
                    armed: true,
                }))
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                self.sink.increment("cache.breaker.rejected");
                Err(PilumError::cache_unavailable(format!(
                    "circuit '{}' is {}",
                    self.name,
                    if state.state == CircuitState::Open {
                        "open"
                    } else {
                        "half-open with a probe in flight"
                    }
                )))
            }
        }
    }

    fn on_success(&self, is_probe: bool) {
        let mut state = self.state.lock();
        match state.state {
            CircuitState::Closed => state.failure_count = 0,
            CircuitState::HalfOpen if is_probe => {
                state.probe_in_flight = false;
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    *state = BreakerState::closed();
                    info!("breaker '{}': closed after successful probes", self.name);
                    self.sink
                        .gauge("cache.breaker.state", CircuitState::Closed.gauge_value());
                }
            }
            // Calls admitted before the circuit opened settle without effect.
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn on_failure(&self, is_probe: bool, message: String) {
        let mut state = self.state.lock();
        state.last_failure_at = Some(Utc::now());
        state.last_error = Some(message);
        match state.state {
            CircuitState::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.config.failure_threshold {
                    self.open(&mut state);
                }
            }
            CircuitState::HalfOpen if is_probe => {
                state.failure_count += 1;
                self.open(&mut state);
            }
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn open(&self, state: &mut BreakerState) {
        state.state = CircuitState::Open;
        state.opened_at = Some(Instant::now());
        state.success_count = 0;
        state.probe_in_flight = false;
        warn!(
            "breaker '{}': open after {} failures (last: {}), retry in {}ms",
            self.name,
            state.failure_count,
            state.last_error.as_deref().unwrap_or("unknown"),
            self.config.reset_timeout.as_millis()
        );
        self.sink
            .gauge("cache.breaker.state", CircuitState::Open.gauge_value());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn breaker(reset: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "remote",
            BreakerConfig::default()
                .with_failure_threshold(3)
                .with_success_threshold(2)
                .with_reset_timeout(reset)
                .with_call_timeout(Duration::from_millis(20)),
        )
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<()> {
        breaker
            .execute(|| async { Err(PilumError::cache_unavailable("down")) })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<()> {
        breaker.execute(|| async { Ok(()) }).await
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_fails_fast() {
        let breaker = breaker(Duration::from_secs(60));
        for _ in 0..3 {
            assert!(fail(&breaker).await.is_err());
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let calls = AtomicU32::new(0);
        let result: Result<()> = breaker
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(PilumError::CacheUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = breaker(Duration::from_secs(60));
        fail(&breaker).await.ok();
        fail(&breaker).await.ok();
        succeed(&breaker).await.unwrap();
        fail(&breaker).await.ok();
        fail(&breaker).await.ok();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let breaker = breaker(Duration::from_secs(60));
        for _ in 0..3 {
            let result: Result<()> = breaker
                .execute(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                })
                .await;
            assert!(matches!(result, Err(PilumError::Timeout(_))));
        }
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_half_open_closes_after_successes() {
        let breaker = breaker(Duration::from_millis(10));
        for _ in 0..3 {
            fail(&breaker).await.ok();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.status().failure_count, 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let breaker = breaker(Duration::from_millis(10));
        for _ in 0..3 {
            fail(&breaker).await.ok();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        fail(&breaker).await.ok();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.status().last_error.is_some());
    }

    #[tokio::test]
    async fn test_cancelled_probe_frees_the_slot() {
        let breaker = breaker(Duration::from_millis(10));
        for _ in 0..3 {
            fail(&breaker).await.ok();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let hanging = breaker.execute(|| std::future::pending::<Result<()>>());
        assert!(
            tokio::time::timeout(Duration::from_millis(5), hanging)
                .await
                .is_err()
        );

        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(succeed(&breaker).await.is_ok());
    }

    #[tokio::test]
    async fn test_reset() {
        let breaker = breaker(Duration::from_secs(60));
        for _ in 0..3 {
            fail(&breaker).await.ok();
        }
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(succeed(&breaker).await.is_ok());
    }
}
