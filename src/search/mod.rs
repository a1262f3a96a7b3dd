//! Hybrid semantic + keyword search.
//!
//! - [`types`]: queries, options, per-call overrides and responses
//! - [`embed`]: the injected [`Embedder`] and [`QueryExpander`] hooks
//! - [`lexical`]: free text to AND-joined full-text terms
//! - [`fusion`]: weighted fusion keyed by result id
//! - [`rerank`]: heuristic boosting pass
//! - [`engine`]: [`HybridSearchEngine`], which ties them together

pub mod config;
pub mod embed;
pub mod engine;
pub mod fusion;
pub mod lexical;
pub mod rerank;
pub mod types;

pub use config::{RerankConfig, SearchConfig};
pub use embed::{Embedder, FnEmbedder, HashEmbedder, NoopExpander, QueryExpander, SynonymExpander};
pub use engine::HybridSearchEngine;
pub use fusion::{Fusion, fuse};
pub use lexical::{normalize_terms, to_tsquery};
pub use rerank::Reranker;
pub use types::{
    Degraded, SearchFilters, SearchMode, SearchOptions, SearchOverrides, SearchQuery,
    SearchResponse, SearchResult, SearchTimings, SourceTag,
};
