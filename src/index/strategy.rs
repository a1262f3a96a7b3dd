//! Query shape selection and SQL rendering.
//!
//! Four shapes cover every vector query the engine issues:
//!
//! | Shape | Threshold | Extra predicate | Rows fetched |
//! |---|---|---|---|
//! | `Basic` | similarity >= `$2` | none | `limit` |
//! | `Filtered` | similarity >= `$2` | `metadata @> $4::jsonb` | `limit` |
//! | `HybridSql` | similarity >= `$2` | keyword CTE joined in SQL, `metadata @> $10::jsonb` | `limit` |
//! | `Approximate` | none (index order) | none | `2 * limit` |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::search::types::{SearchFilters, SearchMode, SearchOptions};

/// How many candidates the approximate shape fetches per requested row.
pub const APPROXIMATE_OVERFETCH: usize = 2;

/// The shape of a vector query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryShape {
    /// Threshold plus order-by-distance.
    Basic,
    /// Basic plus a metadata containment predicate.
    Filtered,
    /// One statement with a vector CTE and a keyword CTE, fused in the store.
    HybridSql,
    /// No exact threshold; over-fetch for later reranking.
    Approximate,
}

impl fmt::Display for QueryShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Source, date and metadata predicates shared by every shape. Parameters
/// `$5`..`$7` are the source allow-list and the date range; `NULL` disables
/// a predicate.
const COMMON_FILTERS: &str = "($5::text[] IS NULL OR source = ANY($5::text[]))
          AND ($6::timestamptz IS NULL OR created_at >= $6::timestamptz)
          AND ($7::timestamptz IS NULL OR created_at <= $7::timestamptz)";

impl QueryShape {
    /// Stable name of the shape.
    pub fn name(&self) -> &'static str {
        match self {
            QueryShape::Basic => "basic",
            QueryShape::Filtered => "filtered",
            QueryShape::HybridSql => "hybrid-sql",
            QueryShape::Approximate => "approximate",
        }
    }

    /// Whether the similarity threshold is applied.
    pub fn applies_threshold(&self) -> bool {
        !matches!(self, QueryShape::Approximate)
    }

    /// Whether the metadata containment predicate is applied.
    pub fn applies_metadata_filter(&self) -> bool {
        matches!(self, QueryShape::Filtered | QueryShape::HybridSql)
    }

    /// Rows to fetch for `limit` requested rows.
    pub fn candidate_limit(&self, limit: usize) -> usize {
        match self {
            QueryShape::Approximate => limit.saturating_mul(APPROXIMATE_OVERFETCH),
            _ => limit,
        }
    }

    /// PostgreSQL (pgvector + tsvector) text of the shape against `table`.
    ///
    /// Parameters: `$1` query vector, `$2` minimum similarity, `$3` limit,
    /// `$4` metadata containment object (filtered) or keyword tsquery
    /// (hybrid-sql), `$5`..`$7` common filters, and for hybrid-sql `$8`/`$9`
    /// the semantic and keyword weights and `$10` the metadata containment
    /// object.
    pub fn render_sql(&self, table: &str) -> String {
        match self {
            QueryShape::Basic => format!(
                "SELECT id, content, metadata, source, created_at,
       1 - (embedding <=> $1::vector) AS similarity
  FROM {table}
 WHERE 1 - (embedding <=> $1::vector) >= $2
   AND {COMMON_FILTERS}
 ORDER BY embedding <=> $1::vector
 LIMIT $3"
            ),
            QueryShape::Filtered => format!(
                "SELECT id, content, metadata, source, created_at,
       1 - (embedding <=> $1::vector) AS similarity
  FROM {table}
 WHERE 1 - (embedding <=> $1::vector) >= $2
   AND ($4::jsonb IS NULL OR metadata @> $4::jsonb)
   AND {COMMON_FILTERS}
 ORDER BY embedding <=> $1::vector
 LIMIT $3"
            ),
            QueryShape::Approximate => format!(
                "SELECT id, content, metadata, source, created_at,
       1 - (embedding <=> $1::vector) AS similarity
  FROM {table}
 WHERE {COMMON_FILTERS}
 ORDER BY embedding <=> $1::vector
 LIMIT $3 * {APPROXIMATE_OVERFETCH}"
            ),
            QueryShape::HybridSql => format!(
                "WITH vector_results AS (
    SELECT id, 1 - (embedding <=> $1::vector) AS vector_score
      FROM {table}
     WHERE 1 - (embedding <=> $1::vector) >= $2
       AND ($10::jsonb IS NULL OR metadata @> $10::jsonb)
       AND {COMMON_FILTERS}
     ORDER BY embedding <=> $1::vector
     LIMIT $3 * 2
),
keyword_results AS (
    SELECT id, ts_rank_cd(to_tsvector('english', content), to_tsquery('english', $4)) AS raw_rank
      FROM {table}
     WHERE to_tsvector('english', content) @@ to_tsquery('english', $4)
       AND ($10::jsonb IS NULL OR metadata @> $10::jsonb)
       AND {COMMON_FILTERS}
     ORDER BY raw_rank DESC
     LIMIT $3 * 2
),
keyword_normalized AS (
    SELECT id, raw_rank / NULLIF(MAX(raw_rank) OVER (), 0) AS text_score
      FROM keyword_results
)
SELECT d.id, d.content, d.metadata, d.source, d.created_at,
       v.vector_score, k.text_score,
       COALESCE(v.vector_score, 0) * $8 + COALESCE(k.text_score, 0) * $9 AS combined_score
  FROM vector_results v
  FULL OUTER JOIN keyword_normalized k ON v.id = k.id
  JOIN {table} d ON d.id = COALESCE(v.id, k.id)
 ORDER BY combined_score DESC, d.id
 LIMIT $3"
            ),
        }
    }
}

/// Chooses a [`QueryShape`] for a call.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexStrategy;

impl IndexStrategy {
    pub fn new() -> Self {
        Self
    }

    /// Pick the shape for `options` and `filters`.
    ///
    /// In-store fusion wins for hybrid calls, then metadata filtering, then
    /// the approximate shape when the caller asked for index-backed search.
    pub fn choose(&self, options: &SearchOptions, filters: &SearchFilters) -> QueryShape {
        if options.in_store_fusion && options.mode == SearchMode::Hybrid {
            QueryShape::HybridSql
        } else {
            self.choose_vector(options, filters)
        }
    }

    /// Shape of a standalone vector query; never `HybridSql`.
    pub fn choose_vector(&self, options: &SearchOptions, filters: &SearchFilters) -> QueryShape {
        if filters.has_metadata() {
            QueryShape::Filtered
        } else if options.use_index {
            QueryShape::Approximate
        } else {
            QueryShape::Basic
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::types::SearchOverrides;
    use serde_json::json;

    #[test]
    fn test_choose_precedence() {
        let strategy = IndexStrategy::new();
        let base = SearchOptions::default();
        let no_filters = SearchFilters::default();
        let with_metadata = SearchFilters::new().with_metadata(json!({"lang": "en"}));

        assert_eq!(strategy.choose(&base, &no_filters), QueryShape::Basic);
        assert_eq!(strategy.choose(&base, &with_metadata), QueryShape::Filtered);

        let indexed = base.merged(&SearchOverrides::default().use_index(true));
        assert_eq!(strategy.choose(&indexed, &no_filters), QueryShape::Approximate);
        assert_eq!(strategy.choose(&indexed, &with_metadata), QueryShape::Filtered);

        let fused = indexed.merged(&SearchOverrides::default().in_store_fusion(true));
        assert_eq!(strategy.choose(&fused, &with_metadata), QueryShape::HybridSql);

        let semantic_only = fused.merged(&SearchOverrides::default().mode(SearchMode::Semantic));
        assert_eq!(strategy.choose(&semantic_only, &no_filters), QueryShape::Approximate);
    }

    #[test]
    fn test_candidate_limit() {
        assert_eq!(QueryShape::Approximate.candidate_limit(10), 20);
        assert_eq!(QueryShape::Basic.candidate_limit(10), 10);
        assert!(!QueryShape::Approximate.applies_threshold());
        assert!(QueryShape::Filtered.applies_metadata_filter());
    }

    #[test]
    fn test_render_sql() {
        let basic = QueryShape::Basic.render_sql("embeddings");
        assert!(basic.contains("1 - (embedding <=> $1::vector) >= $2"));
        assert!(basic.contains("FROM embeddings"));

        let filtered = QueryShape::Filtered.render_sql("embeddings");
        assert!(filtered.contains("metadata @> $4::jsonb"));

        let ann = QueryShape::Approximate.render_sql("embeddings");
        assert!(!ann.contains(">= $2"));
        assert!(ann.contains("LIMIT $3 * 2"));

        let hybrid = QueryShape::HybridSql.render_sql("chunks");
        assert!(hybrid.contains("FULL OUTER JOIN"));
        // both CTEs honour the metadata filter
        assert_eq!(hybrid.matches("metadata @> $10::jsonb").count(), 2);
        assert!(QueryShape::HybridSql.applies_metadata_filter());
        assert!(hybrid.contains("FROM chunks"));
        assert_eq!(QueryShape::HybridSql.to_string(), "hybrid-sql");
    }
}
