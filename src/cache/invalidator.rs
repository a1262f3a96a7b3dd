//! Invalidation triggered by changes outside the retrieval core.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::task::JoinHandle;

use crate::cache::manager::CacheManager;
use crate::error::Result;

/// Namespace of cached search responses.
pub const SEARCH_NAMESPACE: &str = "search";
/// Namespace of cached query expansions and similar per-query data.
pub const QUERY_NAMESPACE: &str = "query";
/// Namespace of per-document entries.
pub const DOCUMENT_NAMESPACE: &str = "document";
/// Namespace of per-source entries.
pub const SOURCE_NAMESPACE: &str = "source";

/// Maps change events to cache invalidations.
#[derive(Clone)]
pub struct CacheInvalidator {
    cache: Arc<CacheManager>,
}

impl CacheInvalidator {
    pub fn new(cache: Arc<CacheManager>) -> Self {
        Self { cache }
    }

    /// A document changed: drop its entries, every cached search, and the
    /// entries of its source when known.
    pub async fn on_document_change(&self, document_id: &str, source_id: Option<&str>) -> Result<usize> {
        let mut removed = self
            .cache
            .invalidate_pattern(&format!("*:{DOCUMENT_NAMESPACE}:{document_id}"))
            .await?;
        removed += self.invalidate_searches().await?;
        if let Some(source_id) = source_id {
            removed += self.invalidate_source(source_id).await?;
        }
        info!("cache: document '{document_id}' changed, {removed} entries invalidated");
        Ok(removed)
    }

    /// A source was re-ingested.
    pub async fn on_source_update(&self, source_id: &str) -> Result<usize> {
        let removed = self.invalidate_source(source_id).await? + self.invalidate_searches().await?;
        info!("cache: source '{source_id}' updated, {removed} entries invalidated");
        Ok(removed)
    }

    /// The search index was rebuilt: drop cached searches and query data.
    pub async fn on_search_index_update(&self) -> Result<usize> {
        let removed = self.invalidate_searches().await?
            + self
                .cache
                .invalidate_pattern(&format!("*:{QUERY_NAMESPACE}:*"))
                .await?;
        info!("cache: search index updated, {removed} entries invalidated");
        Ok(removed)
    }

    /// Invalidate `pattern` after `delay` on a background task.
    pub fn schedule_invalidation(&self, pattern: &str, delay: Duration) -> JoinHandle<usize> {
        let cache = Arc::clone(&self.cache);
        let pattern = pattern.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match cache.invalidate_pattern(&pattern).await {
                Ok(count) => {
                    info!("cache: scheduled invalidation of '{pattern}' removed {count} entries");
                    count
                }
                Err(e) => {
                    warn!("cache: scheduled invalidation of '{pattern}' failed: {e}");
                    0
                }
            }
        })
    }

    async fn invalidate_searches(&self) -> Result<usize> {
        self.cache
            .invalidate_pattern(&format!("*:{SEARCH_NAMESPACE}:*"))
            .await
    }

    async fn invalidate_source(&self, source_id: &str) -> Result<usize> {
        self.cache
            .invalidate_pattern(&format!("*:{SOURCE_NAMESPACE}:{source_id}:*"))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;

    async fn seeded() -> Arc<CacheManager> {
        let cache = Arc::new(CacheManager::new(CacheConfig::default(), None).unwrap());
        for key in [
            "pilum:document:doc-1",
            "pilum:document:doc-2",
            "pilum:search:aaaa",
            "pilum:search:bbbb",
            "pilum:query:cccc",
            "pilum:source:wiki:meta",
        ] {
            cache.set(key, &1, None).await.unwrap();
        }
        cache
    }

    #[tokio::test]
    async fn test_document_change() {
        let cache = seeded().await;
        let invalidator = CacheInvalidator::new(Arc::clone(&cache));

        let removed = invalidator
            .on_document_change("doc-1", Some("wiki"))
            .await
            .unwrap();
        assert_eq!(removed, 4);
        assert_eq!(cache.get::<i32>("pilum:document:doc-2").await, Some(1));
        assert_eq!(cache.get::<i32>("pilum:query:cccc").await, Some(1));
    }

    #[tokio::test]
    async fn test_search_index_update() {
        let cache = seeded().await;
        let invalidator = CacheInvalidator::new(Arc::clone(&cache));
        assert_eq!(invalidator.on_search_index_update().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_scheduled_invalidation() {
        let cache = seeded().await;
        let invalidator = CacheInvalidator::new(Arc::clone(&cache));

        let handle = invalidator.schedule_invalidation("pilum:document:*", Duration::from_millis(5));
        assert_eq!(cache.get::<i32>("pilum:document:doc-1").await, Some(1));
        assert_eq!(handle.await.unwrap(), 2);
        assert_eq!(cache.get::<i32>("pilum:document:doc-1").await, None);
    }
}
