use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use pilum::error::{ErrorKind, PilumError, Result};
use pilum::pool::{ConnectionManager, ConnectionPool, PoolConfig, RetryPolicy};
use pilum::store::{MemoryStore, MemoryStoreManager, StoreConnection};
use tokio_test::{assert_err, assert_ok};

/// Manager whose first `failures` connects fail.
struct FlakyManager {
    failures: AtomicU32,
    attempts: AtomicU32,
    transient: bool,
}

impl FlakyManager {
    fn new(failures: u32, transient: bool) -> Self {
        Self {
            failures: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
            transient,
        }
    }
}

#[async_trait]
impl ConnectionManager for FlakyManager {
    type Connection = u32;

    async fn connect(&self) -> Result<u32> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(if self.transient {
                PilumError::connection("connection refused")
            } else {
                PilumError::connection_rejected("password authentication failed")
            });
        }
        Ok(attempt)
    }

    async fn ping(&self, _conn: &mut u32) -> Result<()> {
        Ok(())
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy::default()
        .with_max_attempts(3)
        .with_base_delay(Duration::from_millis(1))
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[tokio::test]
async fn test_second_acquire_is_exhausted_not_hung() {
    init_logger();
    let pool = ConnectionPool::new(
        FlakyManager::new(0, true),
        PoolConfig::new("store")
            .with_max_size(1)
            .with_acquire_timeout(Duration::from_millis(50)),
    )
    .unwrap();

    let first = pool.acquire("first").await.unwrap();
    let started = Instant::now();
    let second = pool.acquire("second").await;
    let waited = started.elapsed();

    let err = assert_err!(second);
    assert_eq!(err.kind(), ErrorKind::PoolExhausted);
    assert!(err.is_retryable());
    assert!(waited >= Duration::from_millis(50));
    assert!(waited < Duration::from_secs(1));

    first.release();
    assert_ok!(pool.acquire("third").await);
}

#[tokio::test]
async fn test_concurrent_acquires_with_single_slot() {
    let pool = ConnectionPool::new(
        FlakyManager::new(0, true),
        PoolConfig::new("store")
            .with_max_size(1)
            .with_acquire_timeout(Duration::from_millis(30)),
    )
    .unwrap();

    let holder = pool.clone();
    let (a, b) = tokio::join!(
        async move {
            let conn = holder.acquire("a").await?;
            tokio::time::sleep(Duration::from_millis(200)).await;
            drop(conn);
            Ok::<_, PilumError>(())
        },
        async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            pool.acquire("b").await.map(|_| ())
        }
    );
    assert_ok!(a);
    assert!(matches!(b, Err(PilumError::PoolExhausted(_))));
    assert_eq!(pool.stats().errors, 1);
}

#[tokio::test]
async fn test_transient_connect_failures_are_retried() {
    let pool = ConnectionPool::new(
        FlakyManager::new(2, true),
        PoolConfig::new("cache").with_retry(fast_retry()),
    )
    .unwrap();

    let conn = pool.acquire("retry").await.unwrap();
    assert_eq!(*conn, 3);
    assert_eq!(pool.manager().attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_auth_failures_are_not_retried() {
    let pool = ConnectionPool::new(
        FlakyManager::new(5, false),
        PoolConfig::new("cache").with_retry(fast_retry()),
    )
    .unwrap();

    let err = pool.acquire("auth").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
    assert!(!err.is_retryable());
    assert_eq!(pool.manager().attempts.load(Ordering::SeqCst), 1);
    assert_eq!(pool.stats().recent_errors.len(), 1);
}

#[tokio::test]
async fn test_every_path_releases_the_connection() {
    let pool = ConnectionPool::new(
        FlakyManager::new(0, true),
        PoolConfig::new("store").with_max_size(2),
    )
    .unwrap();

    let ok: Result<u32> = pool
        .with_connection("ok", |conn| async move { Ok(*conn) }.boxed())
        .await;
    assert_ok!(ok);

    let failed: Result<()> = pool
        .with_connection("fails", |_conn| {
            async move { Err(PilumError::query("syntax error")) }.boxed()
        })
        .await;
    assert_err!(failed);

    let cancelled = tokio::time::timeout(
        Duration::from_millis(10),
        pool.with_connection("slow", |_conn| {
            async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }
            .boxed()
        }),
    )
    .await;
    assert!(cancelled.is_err());

    let stats = pool.stats();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.acquisitions, 3);
    assert_eq!(pool.outstanding(), 0);
}

#[tokio::test]
async fn test_transaction_rolls_back_on_error() {
    let store = MemoryStore::new();
    let pool = ConnectionPool::new(
        MemoryStoreManager::new(store.clone()),
        PoolConfig::new("store"),
    )
    .unwrap();

    let result: Result<()> = pool
        .with_transaction(|conn| {
            async move {
                conn.execute("CREATE INDEX docs_vec ON embeddings USING hnsw (embedding vector_cosine_ops)")
                    .await?;
                conn.execute("DROP TABLE embeddings").await?;
                Ok(())
            }
            .boxed()
        })
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransactionFailed);
    assert!(!store.has_vector_index());
    assert!(store.ddl_log().is_empty());

    let committed: Result<u64> = pool
        .with_transaction(|conn| {
            async move {
                conn.execute("CREATE INDEX docs_vec ON embeddings USING hnsw (embedding vector_cosine_ops)")
                    .await?;
                conn.row_count().await
            }
            .boxed()
        })
        .await;
    assert_eq!(committed.unwrap(), 0);
    assert!(store.has_vector_index());
}

#[tokio::test]
async fn test_shutdown_waits_for_outstanding_and_rejects_waiters() {
    let pool = ConnectionPool::new(
        FlakyManager::new(0, true),
        PoolConfig::new("store")
            .with_max_size(1)
            .with_acquire_timeout(Duration::from_secs(5))
            .with_shutdown_grace(Duration::from_secs(2)),
    )
    .unwrap();

    let held = pool.acquire("held").await.unwrap();
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire("waiter").await.map(|_| ()) })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let shutting_down = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.shutdown().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    drop(held);

    shutting_down.await.unwrap();
    let waited = waiter.await.unwrap();
    assert!(matches!(waited, Err(PilumError::PoolClosed(_))));
    assert_eq!(pool.outstanding(), 0);

    pool.shutdown().await;
    assert!(matches!(pool.acquire("late").await, Err(PilumError::PoolClosed(_))));
}

#[tokio::test]
async fn test_pools_are_independent() {
    let store_pool = Arc::new(
        ConnectionPool::new(FlakyManager::new(0, true), PoolConfig::new("store").with_max_size(1))
            .unwrap(),
    );
    let cache_pool =
        ConnectionPool::new(FlakyManager::new(0, true), PoolConfig::new("cache").with_max_size(1))
            .unwrap();

    let _store_conn = store_pool.acquire("busy").await.unwrap();
    assert_ok!(cache_pool.acquire("free").await);
    assert_ok!(cache_pool.ping().await);
    assert_eq!(store_pool.name(), "store");
    assert_eq!(cache_pool.name(), "cache");
}
