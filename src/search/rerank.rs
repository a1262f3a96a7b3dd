//! Heuristic rerank pass.
//!
//! Boosts fused scores with three signals: literal occurrences of query
//! terms in the content, content length within a readable band, and
//! recency. It is a tie-breaker for near-equal fused scores, not a learned
//! ranker, and its constants live in [`RerankConfig`].

use chrono::{DateTime, Utc};

use crate::search::config::RerankConfig;
use crate::search::fusion::sort_by_score;
use crate::search::types::SearchResult;

/// Metadata fields consulted, in order, for the publish date.
const DATE_FIELDS: [&str; 2] = ["published_at", "publishedAt"];

/// Applies [`RerankConfig`] to a result list.
#[derive(Debug, Clone, Default)]
pub struct Reranker {
    config: RerankConfig,
}

impl Reranker {
    pub fn new(config: RerankConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RerankConfig {
        &self.config
    }

    /// The bonus `result` earns for `terms` at time `now`.
    pub fn bonus(&self, terms: &[String], result: &SearchResult, now: DateTime<Utc>) -> f32 {
        let config = &self.config;
        let content = result.content.to_lowercase();

        let occurrences: usize = terms
            .iter()
            .filter(|term| !term.is_empty())
            .map(|term| content.matches(term.as_str()).count())
            .sum();
        let mut bonus = (occurrences as f32 * config.term_bonus).min(config.max_term_bonus);

        let words = result.content.split_whitespace().count();
        if (config.min_words..=config.max_words).contains(&words) {
            bonus += config.length_bonus;
        }

        if config.recency_weight > 0.0 {
            if let Some(published) = publish_date(result) {
                let age_days = (now - published).num_seconds().max(0) as f32 / 86_400.0;
                bonus += config.recency_weight * (-age_days / config.recency_decay_days).exp();
            }
        }
        bonus
    }

    /// Add each result's bonus to its score and re-sort.
    pub fn rerank(
        &self,
        terms: &[String],
        mut results: Vec<SearchResult>,
        now: DateTime<Utc>,
    ) -> Vec<SearchResult> {
        for result in &mut results {
            result.score += self.bonus(terms, result, now);
        }
        sort_by_score(&mut results);
        results
    }
}

fn publish_date(result: &SearchResult) -> Option<DateTime<Utc>> {
    DATE_FIELDS
        .iter()
        .filter_map(|field| result.metadata.get(field).and_then(|v| v.as_str()))
        .find_map(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|date| date.with_timezone(&Utc))
        .or(result.created_at)
}
