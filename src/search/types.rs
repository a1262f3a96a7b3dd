//! Query, option and result types for hybrid search.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::duration_ms;
use crate::error::{PilumError, Result};

/// Which retrieval paths a search uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Semantic,
    Keyword,
    #[default]
    Hybrid,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SearchMode::Semantic => "semantic",
            SearchMode::Keyword => "keyword",
            SearchMode::Hybrid => "hybrid",
        };
        f.write_str(name)
    }
}

/// Which sub-search produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
    Semantic,
    Keyword,
    Hybrid,
}

/// Structured predicates applied by the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
    /// Allowed sources; empty means all.
    pub sources: Vec<String>,
    /// Only documents created at or after this instant.
    pub date_from: Option<DateTime<Utc>>,
    /// Only documents created at or before this instant.
    pub date_to: Option<DateTime<Utc>>,
    /// JSON object the document metadata must contain.
    pub metadata: Option<serde_json::Value>,
}

impl SearchFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources = sources.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_date_range(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.date_from = from;
        self.date_to = to;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Whether no predicate is set.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
            && self.date_from.is_none()
            && self.date_to.is_none()
            && self.metadata.is_none()
    }

    /// Whether a metadata containment predicate is set.
    pub fn has_metadata(&self) -> bool {
        self.metadata.is_some()
    }

    /// Check the filters for contradictions.
    pub fn validate(&self) -> Result<()> {
        if let (Some(from), Some(to)) = (self.date_from, self.date_to) {
            if from > to {
                return Err(PilumError::invalid_query(format!(
                    "date_from ({from}) is after date_to ({to})"
                )));
            }
        }
        if let Some(metadata) = &self.metadata {
            if !metadata.is_object() {
                return Err(PilumError::invalid_query(
                    "metadata filter must be a JSON object",
                ));
            }
        }
        Ok(())
    }

    /// Whether a document with these attributes passes the filters.
    pub fn matches(
        &self,
        source: Option<&str>,
        created_at: Option<DateTime<Utc>>,
        metadata: &serde_json::Value,
    ) -> bool {
        if !self.sources.is_empty()
            && !source.is_some_and(|s| self.sources.iter().any(|allowed| allowed == s))
        {
            return false;
        }
        if self.date_from.is_some() || self.date_to.is_some() {
            let Some(created_at) = created_at else {
                return false;
            };
            if self.date_from.is_some_and(|from| created_at < from)
                || self.date_to.is_some_and(|to| created_at > to)
            {
                return false;
            }
        }
        match &self.metadata {
            Some(pattern) => json_contains(metadata, pattern),
            None => true,
        }
    }
}

/// JSON containment with the semantics of PostgreSQL's `jsonb @>`.
pub fn json_contains(value: &serde_json::Value, pattern: &serde_json::Value) -> bool {
    use serde_json::Value;
    match (value, pattern) {
        (Value::Object(value), Value::Object(pattern)) => pattern
            .iter()
            .all(|(key, p)| value.get(key).is_some_and(|v| json_contains(v, p))),
        (Value::Array(value), Value::Array(pattern)) => pattern
            .iter()
            .all(|p| value.iter().any(|v| json_contains(v, p))),
        (Value::Array(value), scalar) if !scalar.is_object() => {
            value.iter().any(|v| v == scalar)
        }
        (value, pattern) => value == pattern,
    }
}

/// Per-call search options with their defaults resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    pub mode: SearchMode,
    pub limit: usize,
    pub offset: usize,
    /// Minimum cosine similarity for semantic results.
    pub min_similarity: f32,
    /// Minimum final score for returned results.
    pub min_score: f32,
    pub semantic_weight: f32,
    pub keyword_weight: f32,
    pub use_cache: bool,
    pub rerank: bool,
    pub expand_query: bool,
    /// Use the approximate (index-backed, over-fetching) query shape.
    pub use_index: bool,
    /// Fuse inside the store with a single hybrid SQL query.
    pub in_store_fusion: bool,
    /// Deadline for the whole call; `None` uses the engine default.
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            mode: SearchMode::Hybrid,
            limit: 10,
            offset: 0,
            min_similarity: 0.7,
            min_score: 0.0,
            semantic_weight: 0.7,
            keyword_weight: 0.3,
            use_cache: true,
            rerank: true,
            expand_query: false,
            use_index: false,
            in_store_fusion: false,
            timeout: None,
        }
    }
}

impl SearchOptions {
    /// These options with every field set in `overrides` replaced.
    pub fn merged(&self, overrides: &SearchOverrides) -> SearchOptions {
        SearchOptions {
            mode: overrides.mode.unwrap_or(self.mode),
            limit: overrides.limit.unwrap_or(self.limit),
            offset: overrides.offset.unwrap_or(self.offset),
            min_similarity: overrides.min_similarity.unwrap_or(self.min_similarity),
            min_score: overrides.min_score.unwrap_or(self.min_score),
            semantic_weight: overrides.semantic_weight.unwrap_or(self.semantic_weight),
            keyword_weight: overrides.keyword_weight.unwrap_or(self.keyword_weight),
            use_cache: overrides.use_cache.unwrap_or(self.use_cache),
            rerank: overrides.rerank.unwrap_or(self.rerank),
            expand_query: overrides.expand_query.unwrap_or(self.expand_query),
            use_index: overrides.use_index.unwrap_or(self.use_index),
            in_store_fusion: overrides.in_store_fusion.unwrap_or(self.in_store_fusion),
            timeout: overrides.timeout.or(self.timeout),
        }
    }

    /// Validate against the engine's `max_limit`.
    pub fn validate(&self, max_limit: usize) -> Result<()> {
        if self.limit == 0 || self.limit > max_limit {
            return Err(PilumError::invalid_query(format!(
                "limit must be between 1 and {max_limit}, got {}",
                self.limit
            )));
        }
        if !(0.0..=1.0).contains(&self.min_similarity) {
            return Err(PilumError::invalid_query(format!(
                "min_similarity must be between 0 and 1, got {}",
                self.min_similarity
            )));
        }
        if self.semantic_weight < 0.0 || self.keyword_weight < 0.0 {
            return Err(PilumError::invalid_query("weights must be non-negative"));
        }
        if self.mode == SearchMode::Hybrid && self.semantic_weight + self.keyword_weight <= 0.0 {
            return Err(PilumError::invalid_query(
                "hybrid search needs a positive semantic or keyword weight",
            ));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(PilumError::invalid_query("timeout must be non-zero"));
        }
        Ok(())
    }
}

/// Options a caller overrides for one call; `None` keeps the default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOverrides {
    pub mode: Option<SearchMode>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub min_similarity: Option<f32>,
    pub min_score: Option<f32>,
    pub semantic_weight: Option<f32>,
    pub keyword_weight: Option<f32>,
    pub use_cache: Option<bool>,
    pub rerank: Option<bool>,
    pub expand_query: Option<bool>,
    pub use_index: Option<bool>,
    pub in_store_fusion: Option<bool>,
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl SearchOverrides {
    pub fn mode(mut self, mode: SearchMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = Some(min_similarity);
        self
    }

    pub fn min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }

    pub fn weights(mut self, semantic: f32, keyword: f32) -> Self {
        self.semantic_weight = Some(semantic);
        self.keyword_weight = Some(keyword);
        self
    }

    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = Some(use_cache);
        self
    }

    pub fn rerank(mut self, rerank: bool) -> Self {
        self.rerank = Some(rerank);
        self
    }

    pub fn expand_query(mut self, expand: bool) -> Self {
        self.expand_query = Some(expand);
        self
    }

    pub fn use_index(mut self, use_index: bool) -> Self {
        self.use_index = Some(use_index);
        self
    }

    pub fn in_store_fusion(mut self, in_store: bool) -> Self {
        self.in_store_fusion = Some(in_store);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Layer `other` on top of these overrides.
    pub fn then(&self, other: &SearchOverrides) -> SearchOverrides {
        SearchOverrides {
            mode: other.mode.or(self.mode),
            limit: other.limit.or(self.limit),
            offset: other.offset.or(self.offset),
            min_similarity: other.min_similarity.or(self.min_similarity),
            min_score: other.min_score.or(self.min_score),
            semantic_weight: other.semantic_weight.or(self.semantic_weight),
            keyword_weight: other.keyword_weight.or(self.keyword_weight),
            use_cache: other.use_cache.or(self.use_cache),
            rerank: other.rerank.or(self.rerank),
            expand_query: other.expand_query.or(self.expand_query),
            use_index: other.use_index.or(self.use_index),
            in_store_fusion: other.in_store_fusion.or(self.in_store_fusion),
            timeout: other.timeout.or(self.timeout),
        }
    }
}

/// A search request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
    pub text: String,
    pub filters: SearchFilters,
    pub options: SearchOverrides,
}

impl SearchQuery {
    pub fn new<S: Into<String>>(text: S) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_options(mut self, options: SearchOverrides) -> Self {
        self.options = options;
        self
    }
}

/// One ranked passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub content: String,
    pub metadata: serde_json::Value,
    /// Final score after fusion and rerank.
    pub score: f32,
    pub semantic_score: Option<f32>,
    pub keyword_score: Option<f32>,
    pub source: SourceTag,
    /// Snippet with `<mark>` highlights, when the keyword path matched.
    pub highlight: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// A sub-search that failed while the other one succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Degraded {
    pub failed: SearchMode,
    pub reason: String,
}

/// Wall-clock time spent in each stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchTimings {
    #[serde(with = "duration_ms")]
    pub embed: Duration,
    #[serde(with = "duration_ms")]
    pub semantic: Duration,
    #[serde(with = "duration_ms")]
    pub keyword: Duration,
    #[serde(with = "duration_ms")]
    pub rerank: Duration,
    #[serde(with = "duration_ms")]
    pub total: Duration,
}

/// What [`HybridSearchEngine::search`](crate::search::HybridSearchEngine::search) returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub mode: SearchMode,
    /// Served from the cache.
    pub cached: bool,
    /// Set when one sub-search failed and results come from the other.
    pub degraded: Option<Degraded>,
    /// Query text after expansion, when expansion changed it.
    pub expanded_query: Option<String>,
    pub timings: SearchTimings,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_merged_overrides() {
        let base = SearchOptions::default();
        let merged = base.merged(&SearchOverrides::default().limit(25).weights(0.5, 0.5));
        assert_eq!(merged.limit, 25);
        assert_eq!(merged.semantic_weight, 0.5);
        assert_eq!(merged.min_similarity, 0.7);
        assert_eq!(merged.mode, SearchMode::Hybrid);

        let layered = SearchOverrides::default()
            .limit(5)
            .then(&SearchOverrides::default().rerank(false));
        assert_eq!(layered.limit, Some(5));
        assert_eq!(layered.rerank, Some(false));
    }

    #[test]
    fn test_option_validation() {
        let options = SearchOptions::default();
        assert!(options.validate(100).is_ok());
        assert!(options.merged(&SearchOverrides::default().limit(0)).validate(100).is_err());
        assert!(options.merged(&SearchOverrides::default().limit(101)).validate(100).is_err());
        assert!(
            options
                .merged(&SearchOverrides::default().weights(0.0, 0.0))
                .validate(100)
                .is_err()
        );
        assert!(
            options
                .merged(&SearchOverrides::default().min_similarity(1.5))
                .validate(100)
                .is_err()
        );
    }

    #[test]
    fn test_filters_match() {
        let jan = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let filters = SearchFilters::new()
            .with_sources(["wiki"])
            .with_date_range(Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()), None)
            .with_metadata(json!({"lang": "en"}));

        let metadata = json!({"lang": "en", "tags": ["ai"]});
        assert!(filters.matches(Some("wiki"), Some(jan), &metadata));
        assert!(!filters.matches(Some("blog"), Some(jan), &metadata));
        assert!(!filters.matches(Some("wiki"), None, &metadata));
        assert!(!filters.matches(Some("wiki"), Some(jan), &json!({"lang": "de"})));
    }

    #[test]
    fn test_json_contains() {
        let doc = json!({"a": 1, "tags": ["x", "y"], "nested": {"b": true, "c": 2}});
        assert!(json_contains(&doc, &json!({})));
        assert!(json_contains(&doc, &json!({"nested": {"b": true}})));
        assert!(json_contains(&doc, &json!({"tags": ["y"]})));
        assert!(!json_contains(&doc, &json!({"tags": ["z"]})));
        assert!(!json_contains(&doc, &json!({"a": 2})));
    }

    #[test]
    fn test_filter_validation() {
        let later = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(
            SearchFilters::new()
                .with_date_range(Some(later), Some(earlier))
                .validate()
                .is_err()
        );
        assert!(SearchFilters::new().with_metadata(json!([1])).validate().is_err());
    }

    #[test]
    fn test_mode_serde() {
        assert_eq!(serde_json::to_string(&SearchMode::Keyword).unwrap(), "\"keyword\"");
        let options: SearchOptions = serde_json::from_str(r#"{"mode":"semantic","limit":3}"#).unwrap();
        assert_eq!(options.mode, SearchMode::Semantic);
        assert_eq!(options.limit, 3);
    }
}
