//! Wiring of the retrieval core.
//!
//! [`RetrievalCore`] is constructed once at process start and passed by
//! reference to whatever serves requests. It owns the store pool, the
//! optional remote-cache pool, the cache manager and the search engine.

use std::sync::Arc;

use log::info;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheConnection, CacheInvalidator, CacheManager, RemoteCache};
use crate::config::CoreConfig;
use crate::error::Result;
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::pool::{ConnectionManager, ConnectionPool};
use crate::search::{
    Embedder, HybridSearchEngine, QueryExpander, SearchOverrides, SearchQuery, SearchResponse,
};
use crate::store::StoreConnection;

/// Readiness of the external dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// The store pool answered a ping.
    pub pool: bool,
    /// The remote cache answered a ping (always true for a local-only cache).
    pub cache: bool,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.pool && self.cache
    }
}

/// The shared pool, cache and search instances of one process.
pub struct RetrievalCore<S: ConnectionManager, C: ConnectionManager> {
    config: CoreConfig,
    store_pool: ConnectionPool<S>,
    cache_pool: Option<ConnectionPool<C>>,
    cache: Arc<CacheManager>,
    invalidator: CacheInvalidator,
    engine: HybridSearchEngine<S>,
}

impl<S, C> RetrievalCore<S, C>
where
    S: ConnectionManager,
    S::Connection: StoreConnection,
    C: ConnectionManager,
    C::Connection: CacheConnection,
{
    /// Build the core. Without `cache_manager` the cache is local only.
    pub fn new(
        config: CoreConfig,
        store_manager: S,
        cache_manager: Option<C>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        Self::with_metrics_sink(config, store_manager, cache_manager, embedder, Arc::new(NoopMetrics))
    }

    /// Build the core with every component reporting to `sink`.
    pub fn with_metrics_sink(
        config: CoreConfig,
        store_manager: S,
        cache_manager: Option<C>,
        embedder: Arc<dyn Embedder>,
        sink: Arc<dyn MetricsSink>,
    ) -> Result<Self> {
        config.validate()?;

        let store_pool = ConnectionPool::with_metrics_sink(
            store_manager,
            config.store_pool.clone(),
            Arc::clone(&sink),
        )?;
        let cache_pool = cache_manager
            .map(|manager| {
                ConnectionPool::with_metrics_sink(manager, config.cache_pool.clone(), Arc::clone(&sink))
            })
            .transpose()?;

        let remote = cache_pool
            .as_ref()
            .map(|pool| Arc::new(pool.clone()) as Arc<dyn RemoteCache>);
        let cache = Arc::new(CacheManager::with_metrics_sink(
            config.cache.clone(),
            remote,
            Arc::clone(&sink),
        )?);

        let engine = HybridSearchEngine::new(store_pool.clone(), embedder, config.search.clone())?
            .with_cache(Arc::clone(&cache))
            .with_metrics_sink(sink);

        info!(
            "retrieval core ready (store pool '{}', remote cache {})",
            store_pool.name(),
            if cache_pool.is_some() { "enabled" } else { "disabled" }
        );

        Ok(Self {
            invalidator: CacheInvalidator::new(Arc::clone(&cache)),
            config,
            store_pool,
            cache_pool,
            cache,
            engine,
        })
    }

    /// Use `expander` for queries with `expand_query` set.
    pub fn with_expander(mut self, expander: Arc<dyn QueryExpander>) -> Self {
        self.engine = self.engine.with_expander(expander);
        self
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn store_pool(&self) -> &ConnectionPool<S> {
        &self.store_pool
    }

    pub fn cache_pool(&self) -> Option<&ConnectionPool<C>> {
        self.cache_pool.as_ref()
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn invalidator(&self) -> &CacheInvalidator {
        &self.invalidator
    }

    pub fn engine(&self) -> &HybridSearchEngine<S> {
        &self.engine
    }

    /// Search with the configured defaults.
    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResponse> {
        self.engine.search(query).await
    }

    /// Search with per-call overrides.
    pub async fn search_with(&self, query: &SearchQuery, overrides: &SearchOverrides) -> Result<SearchResponse> {
        self.engine.search_with(query, overrides).await
    }

    /// Readiness probe.
    pub async fn health_check(&self) -> HealthStatus {
        self.engine.health_check().await
    }

    /// Close both pools. Idempotent.
    pub async fn shutdown(&self) {
        self.store_pool.shutdown().await;
        if let Some(pool) = &self.cache_pool {
            pool.shutdown().await;
        }
        info!("retrieval core shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryCacheManager, MemoryRemoteCache};
    use crate::search::HashEmbedder;
    use crate::store::{Document, MemoryStore, MemoryStoreManager};

    fn core(remote: Option<Arc<MemoryRemoteCache>>) -> (MemoryStore, RetrievalCore<MemoryStoreManager, MemoryCacheManager>) {
        let store = MemoryStore::new();
        let embedder = HashEmbedder::new(32);
        store.insert(Document::new(
            "doc-1",
            "connection pools keep database connections warm",
            embedder.embed_sync("connection pools keep database connections warm"),
        ));
        let core = RetrievalCore::new(
            CoreConfig::default(),
            MemoryStoreManager::new(store.clone()),
            remote.map(MemoryCacheManager::new),
            Arc::new(embedder),
        )
        .unwrap();
        (store, core)
    }

    #[tokio::test]
    async fn test_search_and_health() {
        let remote = Arc::new(MemoryRemoteCache::new());
        let (_store, core) = core(Some(Arc::clone(&remote)));

        let response = core
            .search(&SearchQuery::new("database connection pools"))
            .await
            .unwrap();
        assert_eq!(response.results[0].id, "doc-1");
        assert!(!remote.is_empty());

        let health = core.health_check().await;
        assert!(health.is_healthy());

        remote.set_available(false);
        let health = core.health_check().await;
        assert!(health.pool);
        assert!(!health.cache);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let (_store, core) = core(None);
        assert!(core.cache_pool().is_none());
        core.shutdown().await;
        core.shutdown().await;
        assert!(core.store_pool().is_closed());
        assert!(!core.health_check().await.pool);
    }
}
