//! Semaphore-bounded connection pool with scoped acquisition.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

use crate::error::{PilumError, Result};
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::pool::config::PoolConfig;
use crate::pool::manager::{ConnectionManager, Transactional};
use crate::pool::metrics::{PoolMetrics, PoolStats};

struct IdleConnection<C> {
    id: Uuid,
    conn: C,
    idle_since: Instant,
}

struct ActiveConnection {
    purpose: String,
    acquired_at: Instant,
}

struct PoolInner<M: ConnectionManager> {
    manager: M,
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleConnection<M::Connection>>>,
    active: Mutex<HashMap<Uuid, ActiveConnection>>,
    metrics: PoolMetrics,
    sink: Arc<dyn MetricsSink>,
    closed: AtomicBool,
    returned: Notify,
}

impl<M: ConnectionManager> PoolInner<M> {
    /// Pop the most recently used idle connection that is still usable,
    /// closing expired or broken ones on the way.
    fn take_idle(&self) -> Option<(Uuid, M::Connection)> {
        let mut idle = self.idle.lock();
        while let Some(entry) = idle.pop_back() {
            if entry.idle_since.elapsed() > self.config.idle_timeout {
                debug!(
                    "pool '{}': closing connection {} idle for {}ms",
                    self.config.name,
                    entry.id,
                    entry.idle_since.elapsed().as_millis()
                );
                self.record_removal();
                continue;
            }
            if self.manager.is_broken(&entry.conn) {
                debug!("pool '{}': dropping broken idle connection {}", self.config.name, entry.id);
                self.record_removal();
                continue;
            }
            return Some((entry.id, entry.conn));
        }
        None
    }

    fn record_removal(&self) {
        self.metrics.record_removal();
        self.sink.increment("pool.remove");
    }

    fn record_error(&self, message: String) {
        error!("pool '{}': {message}", self.config.name);
        self.metrics.record_error(message);
        self.sink.increment("pool.error");
    }
}

/// A bounded pool of connections produced by a [`ConnectionManager`].
///
/// Cloning the pool is cheap; clones share the same connections.
pub struct ConnectionPool<M: ConnectionManager> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ConnectionManager> Clone for ConnectionPool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: ConnectionManager> fmt::Debug for ConnectionPool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("name", &self.inner.config.name)
            .field("max_size", &self.inner.config.max_size)
            .field("idle", &self.inner.idle.lock().len())
            .field("active", &self.inner.active.lock().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<M: ConnectionManager> ConnectionPool<M> {
    /// Create a pool that reports to no external metrics sink.
    pub fn new(manager: M, config: PoolConfig) -> Result<Self> {
        Self::with_metrics_sink(manager, config, Arc::new(NoopMetrics))
    }

    /// Create a pool that also reports its events to `sink`.
    pub fn with_metrics_sink(
        manager: M,
        config: PoolConfig,
        sink: Arc<dyn MetricsSink>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                semaphore: Arc::new(Semaphore::new(config.max_size)),
                idle: Mutex::new(VecDeque::with_capacity(config.max_size)),
                active: Mutex::new(HashMap::new()),
                metrics: PoolMetrics::new(config.error_log_capacity),
                sink,
                closed: AtomicBool::new(false),
                returned: Notify::new(),
                manager,
                config,
            }),
        })
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// The manager behind this pool.
    pub fn manager(&self) -> &M {
        &self.inner.manager
    }

    /// Raw metrics collector.
    pub fn metrics(&self) -> &PoolMetrics {
        &self.inner.metrics
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Number of connections currently checked out.
    pub fn outstanding(&self) -> usize {
        self.inner.active.lock().len()
    }

    /// Snapshot of the pool metrics.
    pub fn stats(&self) -> PoolStats {
        let idle = self.inner.idle.lock().len();
        self.inner.metrics.snapshot(idle)
    }

    /// Acquire a connection for `purpose`.
    ///
    /// Waits at most `acquire_timeout` for a free slot and fails with
    /// `PoolExhausted` afterwards. New connections are opened under the
    /// pool's retry policy.
    pub async fn acquire(&self, purpose: &str) -> Result<PooledConnection<M>> {
        let inner = &self.inner;
        if self.is_closed() {
            return Err(PilumError::pool_closed(inner.config.name.clone()));
        }

        let started = Instant::now();
        let permit = match tokio::time::timeout(
            inner.config.acquire_timeout,
            Arc::clone(&inner.semaphore).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PilumError::pool_closed(inner.config.name.clone())),
            Err(_) => {
                let message = format!(
                    "{}: no connection available within {}ms",
                    inner.config.name,
                    inner.config.acquire_timeout.as_millis()
                );
                inner.record_error(format!("acquire for '{purpose}' timed out"));
                inner.sink.increment("pool.exhausted");
                return Err(PilumError::pool_exhausted(message));
            }
        };

        let (id, conn) = match inner.take_idle() {
            Some(reused) => reused,
            None => {
                let manager = &inner.manager;
                let label = format!("pool '{}' connect", inner.config.name);
                match inner.config.retry.run(&label, move |_| manager.connect()).await {
                    Ok(conn) => {
                        inner.metrics.record_connection();
                        inner.sink.increment("pool.connect");
                        (Uuid::new_v4(), conn)
                    }
                    Err(e) => {
                        inner.record_error(format!("connect for '{purpose}' failed: {e}"));
                        return Err(e);
                    }
                }
            }
        };

        let waited = started.elapsed();
        let acquired_at = Instant::now();
        inner.metrics.record_acquisition(waited);
        inner.sink.increment("pool.acquire");
        inner.sink.timing("pool.wait", waited);
        inner.active.lock().insert(
            id,
            ActiveConnection {
                purpose: purpose.to_string(),
                acquired_at,
            },
        );

        Ok(PooledConnection {
            pool: Arc::clone(inner),
            conn: Some(conn),
            permit: Some(permit),
            id,
            acquired_at,
            broken: false,
            in_flight: false,
        })
    }

    /// Run `f` with a pooled connection and release it afterwards.
    ///
    /// If the returned future is dropped while `f` is running, the
    /// connection is discarded rather than returned to the idle set.
    pub async fn with_connection<T, F>(&self, purpose: &str, f: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut M::Connection) -> BoxFuture<'c, Result<T>> + Send,
    {
        let mut conn = self.acquire(purpose).await?;
        conn.begin_operation();
        let result = f(&mut *conn).await;
        conn.end_operation();
        if matches!(result, Err(PilumError::ConnectionFailed { .. })) {
            conn.mark_broken();
        }
        conn.release();
        result
    }

    /// Run `f` inside a transaction.
    ///
    /// Commits when `f` succeeds. When `f` or the commit fails the
    /// transaction is rolled back and `TransactionFailed` is returned. A
    /// connection whose rollback fails is discarded.
    pub async fn with_transaction<T, F>(&self, f: F) -> Result<T>
    where
        T: Send,
        M::Connection: Transactional,
        F: for<'c> FnOnce(&'c mut M::Connection) -> BoxFuture<'c, Result<T>> + Send,
    {
        let mut conn = self.acquire("transaction").await?;
        conn.begin_operation();
        if let Err(e) = conn.begin().await {
            conn.mark_broken();
            conn.end_operation();
            conn.release();
            return Err(PilumError::transaction(format!("begin failed: {e}")));
        }

        let outcome = match f(&mut *conn).await {
            Ok(value) => conn.commit().await.map(|_| value),
            Err(e) => Err(e),
        };

        let result = match outcome {
            Ok(value) => Ok(value),
            Err(e) => {
                if let Err(rollback_error) = conn.rollback().await {
                    warn!(
                        "pool '{}': rollback failed ({rollback_error}), discarding connection {}",
                        self.name(),
                        conn.id()
                    );
                    conn.mark_broken();
                }
                self.inner.record_error(format!("transaction rolled back: {e}"));
                Err(PilumError::transaction(format!("rolled back: {e}")))
            }
        };

        conn.end_operation();
        conn.release();
        result
    }

    /// Health check: acquire a connection and ping it through the manager.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.acquire("health-check").await?;
        let result = self.inner.manager.ping(&mut conn).await;
        if let Err(e) = &result {
            warn!("pool '{}': ping failed: {e}", self.name());
            conn.mark_broken();
        }
        conn.release();
        result
    }

    /// Open connections until `min_idle` are idle. Returns how many were
    /// opened.
    pub async fn warm_up(&self) -> Result<usize> {
        let inner = &self.inner;
        let missing = inner
            .config
            .min_idle
            .saturating_sub(inner.idle.lock().len());

        for _ in 0..missing {
            let conn = inner.manager.connect().await?;
            inner.metrics.record_connection();
            inner.sink.increment("pool.connect");
            inner.idle.lock().push_back(IdleConnection {
                id: Uuid::new_v4(),
                conn,
                idle_since: Instant::now(),
            });
        }

        if missing > 0 {
            info!("pool '{}': warmed up {missing} connections", inner.config.name);
        }
        Ok(missing)
    }

    /// Close the pool.
    ///
    /// New and waiting acquisitions fail with `PoolClosed`, idle
    /// connections are closed, and outstanding connections are awaited for
    /// up to `shutdown_grace`. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            debug!("pool '{}': already shut down", inner.config.name);
            return;
        }

        info!("pool '{}': shutting down", inner.config.name);
        inner.semaphore.close();

        let drained: Vec<_> = inner.idle.lock().drain(..).collect();
        for _ in &drained {
            inner.record_removal();
        }
        drop(drained);

        let deadline = tokio::time::Instant::now() + inner.config.shutdown_grace;
        loop {
            let returned = inner.returned.notified();
            let outstanding = inner.active.lock().len();
            if outstanding == 0 {
                break;
            }
            if tokio::time::timeout_at(deadline, returned).await.is_err() {
                let purposes: Vec<String> = inner
                    .active
                    .lock()
                    .values()
                    .map(|a| format!("{} ({}ms)", a.purpose, a.acquired_at.elapsed().as_millis()))
                    .collect();
                warn!(
                    "pool '{}': shutdown grace expired with {} connections outstanding: {}",
                    inner.config.name,
                    purposes.len(),
                    purposes.join(", ")
                );
                break;
            }
        }

        info!("pool '{}': closed", inner.config.name);
    }
}

/// A connection checked out of a [`ConnectionPool`].
///
/// The connection goes back to the pool exactly once: through
/// [`release`](Self::release), or on drop.
pub struct PooledConnection<M: ConnectionManager> {
    pool: Arc<PoolInner<M>>,
    conn: Option<M::Connection>,
    permit: Option<OwnedSemaphorePermit>,
    id: Uuid,
    acquired_at: Instant,
    broken: bool,
    in_flight: bool,
}

impl<M: ConnectionManager> PooledConnection<M> {
    /// Identifier of the physical connection.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// When this connection was checked out.
    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    /// How long the connection has been held so far.
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Close the connection on release instead of reusing it.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Mark an operation as running. A connection dropped before
    /// [`end_operation`](Self::end_operation) is discarded, since its
    /// protocol state is unknown.
    pub(crate) fn begin_operation(&mut self) {
        self.in_flight = true;
    }

    pub(crate) fn end_operation(&mut self) {
        self.in_flight = false;
    }

    /// Return the connection to the pool.
    pub fn release(mut self) {
        self.return_to_pool();
    }

    fn return_to_pool(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let pool = &self.pool;
        let held = self.acquired_at.elapsed();
        pool.active.lock().remove(&self.id);
        pool.metrics.record_release(held);
        pool.sink.increment("pool.release");
        pool.sink.timing("pool.hold", held);

        let discard = self.broken
            || self.in_flight
            || pool.closed.load(Ordering::Acquire)
            || pool.manager.is_broken(&conn);

        if discard {
            if self.in_flight {
                warn!(
                    "pool '{}': connection {} dropped mid-operation, discarding",
                    pool.config.name, self.id
                );
            }
            pool.record_removal();
            drop(conn);
        } else {
            pool.idle.lock().push_back(IdleConnection {
                id: self.id,
                conn,
                idle_since: Instant::now(),
            });
        }

        // The slot frees up only after the connection is back in the idle set.
        self.permit.take();
        pool.returned.notify_waiters();
    }
}

impl<M: ConnectionManager> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        // `conn` is only taken in `return_to_pool`, which consumes or drops self.
        self.conn.as_ref().unwrap_or_else(|| unreachable!("connection already released"))
    }
}

impl<M: ConnectionManager> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().unwrap_or_else(|| unreachable!("connection already released"))
    }
}

impl<M: ConnectionManager> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        self.return_to_pool();
    }
}

impl<M: ConnectionManager> fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("pool", &self.pool.config.name)
            .field("id", &self.id)
            .field("held_ms", &self.held_for().as_millis())
            .field("broken", &self.broken)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::retry::RetryPolicy;
    use async_trait::async_trait;
    use futures::FutureExt;
    use std::sync::atomic::AtomicU32;

    #[derive(Default)]
    struct CountingManager {
        opened: AtomicU32,
        fail_first: u32,
    }

    struct TestConn {
        serial: u32,
        statements: Vec<String>,
    }

    #[async_trait]
    impl ConnectionManager for CountingManager {
        type Connection = TestConn;

        async fn connect(&self) -> Result<TestConn> {
            let serial = self.opened.fetch_add(1, Ordering::SeqCst);
            if serial < self.fail_first {
                return Err(PilumError::connection("connection refused"));
            }
            Ok(TestConn {
                serial,
                statements: Vec::new(),
            })
        }

        async fn ping(&self, _conn: &mut TestConn) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl Transactional for TestConn {
        async fn begin(&mut self) -> Result<()> {
            self.statements.push("BEGIN".into());
            Ok(())
        }

        async fn commit(&mut self) -> Result<()> {
            self.statements.push("COMMIT".into());
            Ok(())
        }

        async fn rollback(&mut self) -> Result<()> {
            self.statements.push("ROLLBACK".into());
            Ok(())
        }
    }

    fn config(max_size: usize) -> PoolConfig {
        PoolConfig::new("test")
            .with_max_size(max_size)
            .with_acquire_timeout(Duration::from_millis(50))
            .with_shutdown_grace(Duration::from_millis(50))
            .with_retry(RetryPolicy::default().with_base_delay(Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn test_released_connections_are_reused() {
        let pool = ConnectionPool::new(CountingManager::default(), config(2)).unwrap();

        let conn = pool.acquire("first").await.unwrap();
        let id = conn.id();
        conn.release();

        let conn = pool.acquire("second").await.unwrap();
        assert_eq!(conn.id(), id);
        drop(conn);

        let stats = pool.stats();
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.acquisitions, 2);
        assert_eq!(stats.releases, 2);
        assert_eq!(stats.idle, 1);
        assert_eq!(pool.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_connect_is_retried() {
        let manager = CountingManager {
            fail_first: 2,
            ..Default::default()
        };
        let pool = ConnectionPool::new(manager, config(1)).unwrap();

        let conn = pool.acquire("retry").await.unwrap();
        assert_eq!(conn.serial, 2);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_typed_error() {
        let pool = ConnectionPool::new(CountingManager::default(), config(1)).unwrap();
        let _held = pool.acquire("holder").await.unwrap();

        let started = Instant::now();
        let err = pool.acquire("waiter").await.unwrap_err();
        assert!(matches!(err, PilumError::PoolExhausted(_)));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(pool.stats().errors, 1);
    }

    #[tokio::test]
    async fn test_broken_connections_are_discarded() {
        let pool = ConnectionPool::new(CountingManager::default(), config(1)).unwrap();
        let mut conn = pool.acquire("broken").await.unwrap();
        conn.mark_broken();
        conn.release();

        assert_eq!(pool.stats().idle, 0);
        assert_eq!(pool.stats().removals, 1);
    }

    #[tokio::test]
    async fn test_transaction_commits_and_rolls_back() {
        let pool = ConnectionPool::new(CountingManager::default(), config(1)).unwrap();

        let value = pool
            .with_transaction(|conn| {
                async move {
                    conn.statements.push("INSERT".into());
                    Ok(7)
                }
                .boxed()
            })
            .await
            .unwrap();
        assert_eq!(value, 7);

        let err = pool
            .with_transaction(|conn| {
                async move {
                    conn.statements.push("UPDATE".into());
                    Err::<(), _>(PilumError::query("constraint violation"))
                }
                .boxed()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PilumError::TransactionFailed(_)));

        let conn = pool.acquire("inspect").await.unwrap();
        assert_eq!(
            conn.statements,
            vec!["BEGIN", "INSERT", "COMMIT", "BEGIN", "UPDATE", "ROLLBACK"]
        );
    }

    #[tokio::test]
    async fn test_cancelled_operation_discards_connection() {
        let pool = ConnectionPool::new(CountingManager::default(), config(1)).unwrap();

        let slow = pool.with_connection("slow", |_conn| {
            async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            }
            .boxed()
        });
        assert!(
            tokio::time::timeout(Duration::from_millis(10), slow)
                .await
                .is_err()
        );

        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.stats().idle, 0);
        assert!(pool.acquire("after").await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let pool = ConnectionPool::new(CountingManager::default(), config(2)).unwrap();
        pool.acquire("warm").await.unwrap().release();

        pool.shutdown().await;
        pool.shutdown().await;

        assert!(pool.is_closed());
        assert_eq!(pool.stats().idle, 0);
        assert!(matches!(
            pool.acquire("late").await,
            Err(PilumError::PoolClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_warm_up_opens_min_idle() {
        let pool =
            ConnectionPool::new(CountingManager::default(), config(4).with_min_idle(2)).unwrap();
        assert_eq!(pool.warm_up().await.unwrap(), 2);
        assert_eq!(pool.warm_up().await.unwrap(), 0);
        assert_eq!(pool.stats().idle, 2);
    }
}
