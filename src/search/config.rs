//! Search engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration_ms;
use crate::error::{PilumError, Result};
use crate::search::types::SearchOptions;

/// Constants of the heuristic rerank pass.
///
/// The pass is a tie-breaker, not a learned ranker; the defaults are
/// deliberately small relative to fused scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    /// Bonus per literal occurrence of a query term.
    pub term_bonus: f32,
    /// Cap on the summed term bonus.
    pub max_term_bonus: f32,
    /// Bonus for content whose word count is within the readable band.
    pub length_bonus: f32,
    pub min_words: usize,
    pub max_words: usize,
    /// Weight of `exp(-age_days / recency_decay_days)`; 0 disables it.
    pub recency_weight: f32,
    /// Age at which the recency bonus has decayed to `1/e` of its weight.
    pub recency_decay_days: f32,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            term_bonus: 0.1,
            max_term_bonus: 0.5,
            length_bonus: 0.1,
            min_words: 50,
            max_words: 500,
            recency_weight: 0.1,
            recency_decay_days: 365.0,
        }
    }
}

impl RerankConfig {
    pub fn validate(&self) -> Result<()> {
        if self.term_bonus < 0.0
            || self.max_term_bonus < 0.0
            || self.length_bonus < 0.0
            || self.recency_weight < 0.0
        {
            return Err(PilumError::invalid_config("rerank bonuses must be non-negative"));
        }
        if self.min_words > self.max_words {
            return Err(PilumError::invalid_config(
                "rerank min_words must not exceed max_words",
            ));
        }
        if self.recency_decay_days <= 0.0 {
            return Err(PilumError::invalid_config(
                "rerank recency_decay_days must be positive",
            ));
        }
        Ok(())
    }
}

/// Configuration for [`HybridSearchEngine`](crate::search::HybridSearchEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Options used when a call does not override them.
    pub default_options: SearchOptions,

    /// Largest `limit` a caller may request.
    pub max_limit: usize,

    /// Sub-searches fetch `(offset + limit) * candidate_multiplier` rows.
    pub candidate_multiplier: usize,

    /// TTL of cached responses.
    #[serde(with = "duration_ms")]
    pub cache_ttl: Duration,

    /// Deadline of a call that does not set its own.
    #[serde(with = "duration_ms")]
    pub default_timeout: Duration,

    /// Sub-searches that must succeed for a hybrid call to succeed.
    pub min_sources: usize,

    /// Table holding the embedded chunks.
    pub table: String,

    pub rerank: RerankConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_options: SearchOptions::default(),
            max_limit: 100,
            candidate_multiplier: 2,
            cache_ttl: Duration::from_secs(3600),
            default_timeout: Duration::from_secs(10),
            min_sources: 1,
            table: "embeddings".to_string(),
            rerank: RerankConfig::default(),
        }
    }
}

impl SearchConfig {
    pub fn with_default_options(mut self, options: SearchOptions) -> Self {
        self.default_options = options;
        self
    }

    pub fn with_max_limit(mut self, max_limit: usize) -> Self {
        self.max_limit = max_limit;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_min_sources(mut self, min_sources: usize) -> Self {
        self.min_sources = min_sources;
        self
    }

    pub fn with_rerank(mut self, rerank: RerankConfig) -> Self {
        self.rerank = rerank;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_limit == 0 {
            return Err(PilumError::invalid_config("max_limit must be greater than 0"));
        }
        if self.candidate_multiplier == 0 {
            return Err(PilumError::invalid_config(
                "candidate_multiplier must be greater than 0",
            ));
        }
        if self.cache_ttl.is_zero() || self.default_timeout.is_zero() {
            return Err(PilumError::invalid_config(
                "cache_ttl and default_timeout must be non-zero",
            ));
        }
        if !(1..=2).contains(&self.min_sources) {
            return Err(PilumError::invalid_config("min_sources must be 1 or 2"));
        }
        if self.table.is_empty() {
            return Err(PilumError::invalid_config("table must not be empty"));
        }
        self.default_options
            .validate(self.max_limit)
            .map_err(|e| PilumError::invalid_config(format!("default_options: {e}")))?;
        self.rerank.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SearchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_options.semantic_weight, 0.7);
        assert_eq!(config.default_options.keyword_weight, 0.3);
        assert_eq!(config.cache_ttl, Duration::from_secs(3600));
        assert_eq!(config.rerank.recency_decay_days, 365.0);

        let rerank: RerankConfig = serde_json::from_str(r#"{"recency_decay_days": 30.0}"#).unwrap();
        assert_eq!(rerank.recency_decay_days, 30.0);
        assert_eq!(rerank.term_bonus, 0.1);
    }

    #[test]
    fn test_invalid() {
        assert!(SearchConfig::default().with_min_sources(3).validate().is_err());
        assert!(SearchConfig::default().with_max_limit(5).validate().is_err());

        let rerank = RerankConfig {
            min_words: 600,
            ..RerankConfig::default()
        };
        assert!(SearchConfig::default().with_rerank(rerank).validate().is_err());
    }
}
