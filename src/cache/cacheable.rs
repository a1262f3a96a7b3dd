//! Wrap an async function so repeated calls with the same arguments are
//! served from the cache.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use pilum::cache::{cacheable, CacheConfig, CacheManager};
//! use pilum::error::Result;
//!
//! async fn load_title(id: u64) -> Result<String> {
//!     Ok(format!("document {id}"))
//! }
//!
//! # async fn demo() -> Result<()> {
//! let cache = Arc::new(CacheManager::new(CacheConfig::default(), None)?);
//! let titles = cacheable(
//!     cache,
//!     "title",
//!     Some(Duration::from_secs(600)),
//!     |id: &u64| id.to_string(),
//!     load_title,
//! );
//!
//! let first = titles.call(7).await?;
//! let second = titles.call(7).await?; // served from the cache
//! assert_eq!(first, second);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::cache::manager::{CacheManager, ComputeOptions};
use crate::error::Result;

/// A cached version of `func`, built by [`cacheable`].
pub struct Cached<A, K, F> {
    cache: Arc<CacheManager>,
    namespace: String,
    ttl: Option<Duration>,
    key_fn: K,
    func: F,
    _args: PhantomData<fn(A)>,
}

/// Wrap `func` so its results are cached under
/// `prefix:namespace:key_fn(args)` for `ttl`.
pub fn cacheable<A, T, K, F, Fut>(
    cache: Arc<CacheManager>,
    namespace: &str,
    ttl: Option<Duration>,
    key_fn: K,
    func: F,
) -> Cached<A, K, F>
where
    K: Fn(&A) -> String,
    F: Fn(A) -> Fut,
    Fut: Future<Output = Result<T>>,
    T: Serialize + DeserializeOwned,
{
    Cached {
        cache,
        namespace: namespace.to_string(),
        ttl,
        key_fn,
        func,
        _args: PhantomData,
    }
}

impl<A, K, F> Cached<A, K, F> {
    /// Call the wrapped function through the cache.
    pub async fn call<T, Fut>(&self, args: A) -> Result<T>
    where
        K: Fn(&A) -> String,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T>>,
        T: Serialize + DeserializeOwned,
    {
        let key = self
            .cache
            .generate_key(&self.namespace, &(self.key_fn)(&args))?;
        let options = ComputeOptions {
            ttl: self.ttl,
            allow_stale: false,
        };
        self.cache
            .get_or_compute(&key, options, || (self.func)(args))
            .await
    }

    /// Drop the cached result for `args`.
    pub async fn invalidate(&self, args: &A) -> Result<bool>
    where
        K: Fn(&A) -> String,
    {
        let key = self
            .cache
            .generate_key(&self.namespace, &(self.key_fn)(args))?;
        Ok(self.cache.delete(&key).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_repeated_calls_hit_the_cache() {
        let cache = Arc::new(CacheManager::new(CacheConfig::default(), None).unwrap());
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let square = cacheable(
            cache,
            "square",
            None,
            |n: &u32| n.to_string(),
            move |n: u32| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(n * n)
                }
            },
        );

        assert_eq!(square.call(4).await.unwrap(), 16);
        assert_eq!(square.call(4).await.unwrap(), 16);
        assert_eq!(square.call(5).await.unwrap(), 25);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert!(square.invalidate(&4).await.unwrap());
        assert_eq!(square.call(4).await.unwrap(), 16);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
