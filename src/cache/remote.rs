//! The shared remote tier.
//!
//! [`RemoteCache`] is what the [`CacheManager`](crate::cache::CacheManager)
//! talks to. A driver normally implements [`CacheConnection`] and lets a
//! [`ConnectionPool`] provide `RemoteCache`, so the remote tier is reached
//! through its own pool with its own limits and health metrics.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::cache::glob::GlobPattern;
use crate::error::{PilumError, Result};
use crate::pool::{ConnectionManager, ConnectionPool, PooledConnection};

/// Operations of the remote cache tier.
#[async_trait]
pub trait RemoteCache: Send + Sync {
    /// Fetch the raw value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Delete `keys`; returns how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64>;

    /// Keys matching a `*` glob.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Round-trip check.
    async fn ping(&self) -> Result<()>;
}

/// One driver-level connection to the remote cache.
#[async_trait]
pub trait CacheConnection: Send {
    async fn get(&mut self, key: &str) -> Result<Option<String>>;
    async fn set_ex(&mut self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    async fn del(&mut self, keys: &[String]) -> Result<u64>;
    async fn keys(&mut self, pattern: &str) -> Result<Vec<String>>;
    async fn ping(&mut self) -> Result<()>;
}

fn settle<M: ConnectionManager, T>(mut conn: PooledConnection<M>, result: &Result<T>) {
    conn.end_operation();
    if matches!(result, Err(PilumError::ConnectionFailed { .. })) {
        conn.mark_broken();
    }
    conn.release();
}

#[async_trait]
impl<M> RemoteCache for ConnectionPool<M>
where
    M: ConnectionManager,
    M::Connection: CacheConnection,
{
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.acquire("cache.get").await?;
        conn.begin_operation();
        let result = CacheConnection::get(&mut *conn, key).await;
        settle(conn, &result);
        result
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.acquire("cache.set").await?;
        conn.begin_operation();
        let result = conn.set_ex(key, value, ttl).await;
        settle(conn, &result);
        result
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.acquire("cache.delete").await?;
        conn.begin_operation();
        let result = conn.del(keys).await;
        settle(conn, &result);
        result
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.acquire("cache.keys").await?;
        conn.begin_operation();
        let result = CacheConnection::keys(&mut *conn, pattern).await;
        settle(conn, &result);
        result
    }

    async fn ping(&self) -> Result<()> {
        ConnectionPool::ping(self).await
    }
}

struct StoredValue {
    value: String,
    expires_at: Instant,
}

/// In-process remote tier, for tests and single-process deployments.
///
/// It can be used directly as a [`RemoteCache`], or through a pool via
/// [`MemoryCacheManager`]. [`set_available`](Self::set_available) simulates
/// an outage.
#[derive(Default)]
pub struct MemoryRemoteCache {
    entries: Mutex<HashMap<String, StoredValue>>,
    unavailable: AtomicBool,
}

impl MemoryRemoteCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail (`false`) or succeed again (`true`).
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of unexpired entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|stored| stored.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(PilumError::connection("remote cache unreachable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteCache for MemoryRemoteCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some(stored) if stored.expires_at > Instant::now() => {
                return Ok(Some(stored.value.clone()));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.check()?;
        self.entries.lock().insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        self.check()?;
        let mut entries = self.entries.lock();
        Ok(keys.iter().filter(|key| entries.remove(*key).is_some()).count() as u64)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.check()?;
        let glob = GlobPattern::new(pattern)?;
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .iter()
            .filter(|(key, stored)| stored.expires_at > now && glob.matches(key))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }
}

/// Connection manager handing out connections to a shared
/// [`MemoryRemoteCache`].
#[derive(Clone)]
pub struct MemoryCacheManager {
    cache: Arc<MemoryRemoteCache>,
}

impl MemoryCacheManager {
    pub fn new(cache: Arc<MemoryRemoteCache>) -> Self {
        Self { cache }
    }
}

/// A connection produced by [`MemoryCacheManager`].
pub struct MemoryCacheConnection {
    cache: Arc<MemoryRemoteCache>,
}

#[async_trait]
impl ConnectionManager for MemoryCacheManager {
    type Connection = MemoryCacheConnection;

    async fn connect(&self) -> Result<MemoryCacheConnection> {
        self.cache.check()?;
        Ok(MemoryCacheConnection {
            cache: Arc::clone(&self.cache),
        })
    }

    async fn ping(&self, conn: &mut MemoryCacheConnection) -> Result<()> {
        CacheConnection::ping(conn).await
    }
}

#[async_trait]
impl CacheConnection for MemoryCacheConnection {
    async fn get(&mut self, key: &str) -> Result<Option<String>> {
        RemoteCache::get(self.cache.as_ref(), key).await
    }

    async fn set_ex(&mut self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        RemoteCache::set(self.cache.as_ref(), key, value, ttl).await
    }

    async fn del(&mut self, keys: &[String]) -> Result<u64> {
        RemoteCache::delete(self.cache.as_ref(), keys).await
    }

    async fn keys(&mut self, pattern: &str) -> Result<Vec<String>> {
        RemoteCache::keys(self.cache.as_ref(), pattern).await
    }

    async fn ping(&mut self) -> Result<()> {
        RemoteCache::ping(self.cache.as_ref()).await
    }
}
