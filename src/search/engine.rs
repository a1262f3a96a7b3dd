//! The hybrid search engine.
//!
//! A call resolves its options, consults the cache, runs the semantic and
//! keyword sub-searches concurrently, fuses and reranks, then writes the
//! response back to the cache. Every call runs under a deadline; when it
//! expires the in-flight sub-searches are dropped (their pooled
//! connections are discarded) and `Timeout` is returned.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use futures::future::join_all;
use log::{debug, info, warn};
use serde::Serialize;

use crate::cache::CacheManager;
use crate::cache::invalidator::SEARCH_NAMESPACE;
use crate::core::HealthStatus;
use crate::error::{PilumError, Result};
use crate::index::{IndexStrategy, QueryShape};
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::pool::{ConnectionManager, ConnectionPool};
use crate::search::config::SearchConfig;
use crate::search::embed::{Embedder, NoopExpander, QueryExpander};
use crate::search::fusion::{Fusion, sort_by_score};
use crate::search::lexical::normalize_terms;
use crate::search::rerank::Reranker;
use crate::search::types::{
    Degraded, SearchFilters, SearchMode, SearchOptions, SearchOverrides, SearchQuery,
    SearchResponse, SearchResult, SearchTimings, SourceTag,
};
use crate::store::{DocumentRow, FullTextQuery, HybridQuery, StoreConnection, VectorQuery};

/// What a cached response is keyed by.
#[derive(Serialize)]
struct CacheMaterial<'a> {
    mode: SearchMode,
    text: &'a str,
    options: &'a SearchOptions,
    filters: &'a SearchFilters,
}

/// Results of one sub-search plus the time it took.
struct SubSearch {
    results: Vec<SearchResult>,
    embed: Duration,
    elapsed: Duration,
}

/// Hybrid semantic + keyword search over a pooled store.
pub struct HybridSearchEngine<M: ConnectionManager> {
    pool: ConnectionPool<M>,
    cache: Option<Arc<CacheManager>>,
    embedder: Arc<dyn Embedder>,
    expander: Arc<dyn QueryExpander>,
    strategy: IndexStrategy,
    reranker: Reranker,
    config: SearchConfig,
    sink: Arc<dyn MetricsSink>,
}

impl<M> HybridSearchEngine<M>
where
    M: ConnectionManager,
    M::Connection: StoreConnection,
{
    /// Create an engine without a cache or query expansion.
    pub fn new(pool: ConnectionPool<M>, embedder: Arc<dyn Embedder>, config: SearchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            pool,
            cache: None,
            embedder,
            expander: Arc::new(NoopExpander),
            strategy: IndexStrategy::new(),
            reranker: Reranker::new(config.rerank.clone()),
            config,
            sink: Arc::new(NoopMetrics),
        })
    }

    /// Cache responses in `cache`.
    pub fn with_cache(mut self, cache: Arc<CacheManager>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Expand queries with `expander` when `expand_query` is set.
    pub fn with_expander(mut self, expander: Arc<dyn QueryExpander>) -> Self {
        self.expander = expander;
        self
    }

    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn pool(&self) -> &ConnectionPool<M> {
        &self.pool
    }

    pub fn cache(&self) -> Option<&Arc<CacheManager>> {
        self.cache.as_ref()
    }

    /// Options of `query` with its overrides and `overrides` applied.
    pub fn resolve_options(&self, query: &SearchQuery, overrides: &SearchOverrides) -> SearchOptions {
        self.config
            .default_options
            .merged(&query.options.then(overrides))
    }

    /// Run `query` in the mode its options select.
    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResponse> {
        self.search_with(query, &SearchOverrides::default()).await
    }

    /// Run `query` with `overrides` layered over its own options.
    pub async fn search_with(&self, query: &SearchQuery, overrides: &SearchOverrides) -> Result<SearchResponse> {
        let options = self.resolve_options(query, overrides);
        options.validate(self.config.max_limit)?;
        query.filters.validate()?;
        if query.text.trim().is_empty() {
            return Err(PilumError::invalid_query("query text must not be empty"));
        }

        let budget = options.timeout.unwrap_or(self.config.default_timeout);
        let deadline = tokio::time::Instant::now() + budget;
        let started = Instant::now();

        let outcome = tokio::time::timeout_at(deadline, self.execute(query, &options)).await;
        self.sink.timing("search.latency", started.elapsed());
        match outcome {
            Ok(Ok(response)) => {
                self.sink.increment("search.ok");
                Ok(response)
            }
            Ok(Err(e)) => {
                self.sink.increment("search.error");
                Err(e)
            }
            Err(_) => {
                self.sink.increment("search.timeout");
                warn!("search: '{}' timed out after {}ms", query.text, budget.as_millis());
                Err(PilumError::timeout(format!(
                    "search did not complete within {}ms",
                    budget.as_millis()
                )))
            }
        }
    }

    /// Semantic-only search.
    pub async fn semantic_search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        let overrides = SearchOverrides::default().mode(SearchMode::Semantic);
        Ok(self.search_with(query, &overrides).await?.results)
    }

    /// Keyword-only search.
    pub async fn keyword_search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        let overrides = SearchOverrides::default().mode(SearchMode::Keyword);
        Ok(self.search_with(query, &overrides).await?.results)
    }

    /// Fused semantic + keyword search.
    pub async fn hybrid_search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        let overrides = SearchOverrides::default().mode(SearchMode::Hybrid);
        Ok(self.search_with(query, &overrides).await?.results)
    }

    /// Rerank `results` for `text` with the engine's rerank settings.
    pub fn rerank(&self, text: &str, results: Vec<SearchResult>) -> Vec<SearchResult> {
        self.reranker.rerank(&normalize_terms(text), results, Utc::now())
    }

    /// Store and cache health.
    pub async fn health_check(&self) -> HealthStatus {
        let pool = match self.pool.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!("search: store health check failed: {e}");
                false
            }
        };
        let cache = match &self.cache {
            Some(cache) => cache.health_check().await,
            None => true,
        };
        HealthStatus { pool, cache }
    }

    /// Run hybrid searches for `queries` so their responses are cached.
    /// Returns how many succeeded.
    pub async fn warm_cache<S: AsRef<str>>(&self, queries: &[S]) -> usize {
        info!("search: warming cache with {} queries", queries.len());
        let outcomes = join_all(queries.iter().map(|text| async move {
            let query = SearchQuery::new(text.as_ref());
            match self.hybrid_search(&query).await {
                Ok(_) => true,
                Err(e) => {
                    warn!("search: warm-up for '{}' failed: {e}", text.as_ref());
                    false
                }
            }
        }))
        .await;
        let warmed = outcomes.into_iter().filter(|ok| *ok).count();
        info!("search: cache warm-up complete ({warmed}/{})", queries.len());
        warmed
    }

    async fn execute(&self, query: &SearchQuery, options: &SearchOptions) -> Result<SearchResponse> {
        let started = Instant::now();

        let cache_key = match (&self.cache, options.use_cache) {
            (Some(cache), true) => self.cache_key(cache, query, options),
            _ => None,
        };
        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(mut response) = cache.get::<SearchResponse>(key).await {
                debug!("search: cache hit for '{}'", query.text);
                self.sink.increment("search.cache_hit");
                response.cached = true;
                response.timings = SearchTimings {
                    total: started.elapsed(),
                    ..SearchTimings::default()
                };
                return Ok(response);
            }
        }

        let expanded = if options.expand_query && options.mode != SearchMode::Keyword {
            self.expand(&query.text).await
        } else {
            None
        };
        let semantic_text = expanded.as_deref().unwrap_or(&query.text);
        let fetch = options
            .offset
            .saturating_add(options.limit)
            .saturating_mul(self.config.candidate_multiplier);
        let shape = self.strategy.choose(options, &query.filters);

        let mut timings = SearchTimings::default();
        let mut degraded = None;
        let candidates = match (options.mode, shape) {
            (SearchMode::Hybrid, QueryShape::HybridSql) => {
                let sub = self
                    .in_store_candidates(semantic_text, &query.text, &query.filters, options, fetch)
                    .await?;
                timings.embed = sub.embed;
                timings.semantic = sub.elapsed;
                timings.keyword = sub.elapsed;
                sub.results
            }
            (SearchMode::Semantic, _) => {
                let sub = self
                    .semantic_candidates(semantic_text, shape, &query.filters, options, fetch)
                    .await?;
                timings.embed = sub.embed;
                timings.semantic = sub.elapsed;
                sub.results
            }
            (SearchMode::Keyword, _) => {
                let sub = self.keyword_candidates(&query.text, &query.filters, fetch).await?;
                timings.keyword = sub.elapsed;
                sub.results
            }
            (SearchMode::Hybrid, _) => {
                let (semantic, keyword) = tokio::join!(
                    self.semantic_candidates(semantic_text, shape, &query.filters, options, fetch),
                    self.keyword_candidates(&query.text, &query.filters, fetch),
                );
                let (results, failed) =
                    self.combine(semantic, keyword, options, &mut timings)?;
                degraded = failed;
                results
            }
        };

        let mut results = candidates;
        if options.rerank && options.mode == SearchMode::Hybrid {
            let rerank_started = Instant::now();
            results = self.rerank(&query.text, results);
            timings.rerank = rerank_started.elapsed();
        }
        let results: Vec<SearchResult> = results
            .into_iter()
            .filter(|r| r.score >= options.min_score)
            .skip(options.offset)
            .take(options.limit)
            .collect();
        timings.total = started.elapsed();

        let response = SearchResponse {
            results,
            mode: options.mode,
            cached: false,
            degraded,
            expanded_query: expanded,
            timings,
        };

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if response.degraded.is_none() {
                if let Err(e) = cache.set(key, &response, Some(self.config.cache_ttl)).await {
                    warn!("search: could not cache response for '{}': {e}", query.text);
                }
            }
        }
        Ok(response)
    }

    /// Fuse the outcomes of the two sub-searches.
    ///
    /// One failure degrades the call to the surviving source unless
    /// `min_sources` requires both; two failures are `SearchFailed`.
    fn combine(
        &self,
        semantic: Result<SubSearch>,
        keyword: Result<SubSearch>,
        options: &SearchOptions,
        timings: &mut SearchTimings,
    ) -> Result<(Vec<SearchResult>, Option<Degraded>)> {
        match (semantic, keyword) {
            (Ok(semantic), Ok(keyword)) => {
                timings.embed = semantic.embed;
                timings.semantic = semantic.elapsed;
                timings.keyword = keyword.elapsed;
                let fused = Fusion::new(options.semantic_weight, options.keyword_weight)
                    .add(SourceTag::Semantic, semantic.results)
                    .add(SourceTag::Keyword, keyword.results)
                    .finish();
                Ok((fused, None))
            }
            (Ok(semantic), Err(e)) => {
                let degraded = self.degrade(SearchMode::Keyword, e)?;
                timings.embed = semantic.embed;
                timings.semantic = semantic.elapsed;
                let results = Fusion::new(1.0, 0.0)
                    .add(SourceTag::Semantic, semantic.results)
                    .finish();
                Ok((results, Some(degraded)))
            }
            (Err(e), Ok(keyword)) => {
                let degraded = self.degrade(SearchMode::Semantic, e)?;
                timings.keyword = keyword.elapsed;
                let results = Fusion::new(0.0, 1.0)
                    .add(SourceTag::Keyword, keyword.results)
                    .finish();
                Ok((results, Some(degraded)))
            }
            (Err(semantic), Err(keyword)) => {
                self.sink.increment("search.failed");
                Err(PilumError::search_failed(format!(
                    "semantic search: {semantic}; keyword search: {keyword}"
                )))
            }
        }
    }

    fn degrade(&self, failed: SearchMode, error: PilumError) -> Result<Degraded> {
        if self.config.min_sources > 1 {
            return Err(PilumError::search_failed(format!(
                "{failed} search failed and min_sources is {}: {error}",
                self.config.min_sources
            )));
        }
        warn!("search: {failed} search failed, serving single-source results: {error}");
        self.sink.increment("search.degraded");
        Ok(Degraded {
            failed,
            reason: error.to_string(),
        })
    }

    fn cache_key(&self, cache: &CacheManager, query: &SearchQuery, options: &SearchOptions) -> Option<String> {
        let material = CacheMaterial {
            mode: options.mode,
            text: &query.text,
            options,
            filters: &query.filters,
        };
        match cache.generate_key(SEARCH_NAMESPACE, &material) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!("search: cannot build cache key, bypassing cache: {e}");
                None
            }
        }
    }

    /// Expanded text, or `None` when expansion failed or changed nothing.
    async fn expand(&self, text: &str) -> Option<String> {
        match self.expander.expand(text).await {
            Ok(expanded) if expanded.trim() != text.trim() && !expanded.trim().is_empty() => {
                debug!("search: expanded '{text}' to '{expanded}'");
                Some(expanded)
            }
            Ok(_) => None,
            Err(e) => {
                warn!("search: query expansion failed, using the original text: {e}");
                None
            }
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let vector = self.embedder.embed(text).await.map_err(|e| match e {
            PilumError::EmbeddingFailed(_) | PilumError::Timeout(_) => e,
            other => PilumError::embedding(other.to_string()),
        })?;
        if vector.len() != self.embedder.dimension() {
            return Err(PilumError::embedding(format!(
                "expected {} dimensions, got {}",
                self.embedder.dimension(),
                vector.len()
            )));
        }
        Ok(vector)
    }

    async fn semantic_candidates(
        &self,
        text: &str,
        shape: QueryShape,
        filters: &SearchFilters,
        options: &SearchOptions,
        fetch: usize,
    ) -> Result<SubSearch> {
        let started = Instant::now();
        let embedding = self.embed(text).await?;
        let embed = started.elapsed();

        let request = VectorQuery {
            embedding,
            shape,
            limit: fetch,
            min_similarity: options.min_similarity,
            filters: filters.clone(),
        };
        debug!("search: semantic query with shape {}", request.shape);
        let rows = self
            .pool
            .with_connection("semantic-search", move |conn| {
                async move { conn.vector_query(&request).await }.boxed()
            })
            .await;

        let results = rows_or_empty(rows)?
            .into_iter()
            .map(|row| {
                let similarity = row.score;
                into_result(row, SourceTag::Semantic, Some(similarity), None, similarity)
            })
            .collect();
        Ok(SubSearch {
            results,
            embed,
            elapsed: started.elapsed(),
        })
    }

    async fn keyword_candidates(&self, text: &str, filters: &SearchFilters, fetch: usize) -> Result<SubSearch> {
        let started = Instant::now();
        let terms = normalize_terms(text);
        if terms.is_empty() {
            debug!("search: no keyword terms in '{text}'");
            return Ok(SubSearch {
                results: Vec::new(),
                embed: Duration::ZERO,
                elapsed: started.elapsed(),
            });
        }

        let request = FullTextQuery {
            terms,
            limit: fetch,
            filters: filters.clone(),
            highlight: true,
        };
        let rows = self
            .pool
            .with_connection("keyword-search", move |conn| {
                async move { conn.full_text_query(&request).await }.boxed()
            })
            .await;
        let rows = rows_or_empty(rows)?;

        let max_rank = rows.iter().map(|row| row.score).fold(0.0_f32, f32::max);
        let results = rows
            .into_iter()
            .map(|row| {
                let normalized = if max_rank > 0.0 { row.score / max_rank } else { 0.0 };
                into_result(row, SourceTag::Keyword, None, Some(normalized), normalized)
            })
            .collect();
        Ok(SubSearch {
            results,
            embed: Duration::ZERO,
            elapsed: started.elapsed(),
        })
    }

    /// Hybrid search as one store query (the `hybrid-sql` shape).
    async fn in_store_candidates(
        &self,
        semantic_text: &str,
        keyword_text: &str,
        filters: &SearchFilters,
        options: &SearchOptions,
        fetch: usize,
    ) -> Result<SubSearch> {
        let started = Instant::now();
        let embedding = self.embed(semantic_text).await?;
        let embed = started.elapsed();

        let request = HybridQuery {
            embedding,
            terms: normalize_terms(keyword_text),
            limit: fetch,
            min_similarity: options.min_similarity,
            semantic_weight: options.semantic_weight,
            keyword_weight: options.keyword_weight,
            filters: filters.clone(),
        };
        debug!("search: in-store fusion with shape {}", QueryShape::HybridSql);
        let rows = self
            .pool
            .with_connection("hybrid-search", move |conn| {
                async move { conn.hybrid_query(&request).await }.boxed()
            })
            .await;

        let mut results: Vec<SearchResult> = rows_or_empty(rows)?
            .into_iter()
            .map(|hybrid| {
                let source = match (hybrid.semantic_score, hybrid.keyword_score) {
                    (Some(_), Some(_)) => SourceTag::Hybrid,
                    (None, Some(_)) => SourceTag::Keyword,
                    _ => SourceTag::Semantic,
                };
                into_result(
                    hybrid.row,
                    source,
                    hybrid.semantic_score,
                    hybrid.keyword_score,
                    hybrid.combined_score,
                )
            })
            .collect();
        sort_by_score(&mut results);
        Ok(SubSearch {
            results,
            embed,
            elapsed: started.elapsed(),
        })
    }
}

/// `NoRows` is an empty result; driver-level query failures become
/// `SearchFailed`; everything else keeps its kind.
fn rows_or_empty<T>(rows: Result<Vec<T>>) -> Result<Vec<T>> {
    match rows {
        Ok(rows) => Ok(rows),
        Err(PilumError::NoRows) => Ok(Vec::new()),
        Err(PilumError::Query(message)) => Err(PilumError::search_failed(message)),
        Err(e) => Err(e),
    }
}

fn into_result(
    row: DocumentRow,
    source: SourceTag,
    semantic_score: Option<f32>,
    keyword_score: Option<f32>,
    score: f32,
) -> SearchResult {
    SearchResult {
        id: row.id,
        content: row.content,
        metadata: row.metadata,
        score,
        semantic_score,
        keyword_score,
        source,
        highlight: row.highlight,
        created_at: row.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::pool::PoolConfig;
    use crate::search::embed::{HashEmbedder, SynonymExpander};
    use crate::store::{Document, MemoryStore, MemoryStoreManager, StoreOperation};
    use serde_json::json;

    const DIM: usize = 64;

    fn corpus(store: &MemoryStore, embedder: &HashEmbedder) {
        let docs = [
            ("rust-async", "tokio drives async rust services with a work stealing runtime", "docs"),
            ("rust-own", "rust ownership and borrowing make memory safety practical", "book"),
            ("pg-vector", "pgvector adds vector similarity search to postgres", "docs"),
            ("pg-fts", "postgres full text search ranks documents with tsvector", "blog"),
        ];
        for (id, content, source) in docs {
            store.insert(
                Document::new(id, content, embedder.embed_sync(content))
                    .with_source(source)
                    .with_metadata(json!({ "source": source })),
            );
        }
    }

    fn engine(store: &MemoryStore) -> HybridSearchEngine<MemoryStoreManager> {
        let embedder = HashEmbedder::new(DIM);
        corpus(store, &embedder);
        let pool = ConnectionPool::new(MemoryStoreManager::new(store.clone()), PoolConfig::new("store"))
            .unwrap();
        let config = SearchConfig::default().with_default_options(SearchOptions {
            min_similarity: 0.2,
            ..SearchOptions::default()
        });
        HybridSearchEngine::new(pool, Arc::new(embedder), config).unwrap()
    }

    #[tokio::test]
    async fn test_keyword_scores_are_normalised() {
        let store = MemoryStore::new();
        let engine = engine(&store);
        let results = engine
            .keyword_search(&SearchQuery::new("postgres search"))
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert!(results.iter().all(|r| r.source == SourceTag::Keyword));
        assert!(results.iter().all(|r| r.highlight.as_deref().is_some_and(|h| h.contains("<mark>"))));
    }

    #[tokio::test]
    async fn test_short_terms_only_gives_empty_keyword_results() {
        let store = MemoryStore::new();
        let engine = engine(&store);
        let results = engine.keyword_search(&SearchQuery::new("a of")).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_semantic_search_finds_exact_text() {
        let store = MemoryStore::new();
        let engine = engine(&store);
        let results = engine
            .semantic_search(&SearchQuery::new(
                "rust ownership and borrowing make memory safety practical",
            ))
            .await
            .unwrap();
        assert_eq!(results[0].id, "rust-own");
        assert!((results[0].score - 1.0).abs() < 1e-5);
        assert_eq!(results[0].source, SourceTag::Semantic);
    }

    #[tokio::test]
    async fn test_invalid_input() {
        let store = MemoryStore::new();
        let engine = engine(&store);
        let err = engine.search(&SearchQuery::new("   ")).await.unwrap_err();
        assert!(matches!(err, PilumError::InvalidQuery(_)));

        let query = SearchQuery::new("rust").with_options(SearchOverrides::default().limit(1000));
        assert!(matches!(engine.search(&query).await, Err(PilumError::InvalidQuery(_))));
    }

    #[tokio::test]
    async fn test_store_failure_maps_to_search_failed() {
        let store = MemoryStore::new();
        let engine = engine(&store);
        store.set_failing(StoreOperation::FullTextQuery, true);
        let err = engine.keyword_search(&SearchQuery::new("postgres")).await.unwrap_err();
        assert!(matches!(err, PilumError::SearchFailed(_)));
    }

    #[tokio::test]
    async fn test_in_store_fusion_matches_shape() {
        let store = MemoryStore::new();
        let engine = engine(&store);
        let query = SearchQuery::new("postgres full text search ranks documents with tsvector")
            .with_options(SearchOverrides::default().in_store_fusion(true).rerank(false));
        let response = engine.search(&query).await.unwrap();
        assert_eq!(response.results[0].id, "pg-fts");
        assert_eq!(response.results[0].source, SourceTag::Hybrid);
        assert!((response.results[0].score - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_expansion_is_reported() {
        let store = MemoryStore::new();
        let engine = engine(&store).with_expander(Arc::new(
            SynonymExpander::new().with_synonyms("postgres", ["pgvector"]),
        ));
        let query = SearchQuery::new("postgres similarity")
            .with_options(SearchOverrides::default().expand_query(true));
        let response = engine.search(&query).await.unwrap();
        assert_eq!(response.expanded_query.as_deref(), Some("postgres similarity pgvector"));
    }

    #[tokio::test]
    async fn test_cached_response_is_marked() {
        let store = MemoryStore::new();
        let cache = Arc::new(CacheManager::new(CacheConfig::default(), None).unwrap());
        let engine = engine(&store).with_cache(Arc::clone(&cache));
        let query = SearchQuery::new("tokio async runtime");

        let first = engine.search(&query).await.unwrap();
        let second = engine.search(&query).await.unwrap();
        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.results, second.results);

        let uncached = engine
            .search_with(&query, &SearchOverrides::default().use_cache(false))
            .await
            .unwrap();
        assert!(!uncached.cached);
    }

    #[tokio::test]
    async fn test_huge_offset_saturates() {
        let store = MemoryStore::new();
        let engine = engine(&store);
        let query = SearchQuery::new("postgres search")
            .with_options(SearchOverrides::default().offset(usize::MAX));
        let response = engine.search(&query).await.unwrap();
        assert!(response.results.is_empty());
    }

    #[tokio::test]
    async fn test_in_store_fusion_only_applies_to_hybrid_mode() {
        let store = MemoryStore::new();
        let engine = engine(&store);
        let query = SearchQuery::new("postgres full text search ranks documents with tsvector")
            .with_options(
                SearchOverrides::default()
                    .in_store_fusion(true)
                    .mode(SearchMode::Semantic),
            );
        let response = engine.search(&query).await.unwrap();
        assert_eq!(response.results[0].id, "pg-fts");
        assert!(response.results.iter().all(|r| r.source == SourceTag::Semantic));
    }
}
