//! The relational/vector store contract.
//!
//! Everything the search engine and index tooling need from a database
//! connection is expressed by [`StoreConnection`]. A PostgreSQL backend
//! implements it by binding the parameters of [`QueryShape::render_sql`];
//! [`MemoryStore`] implements it in-process.
//!
//! [`QueryShape::render_sql`]: crate::index::QueryShape::render_sql

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::index::QueryShape;
use crate::pool::Transactional;
use crate::search::types::SearchFilters;

pub use memory::{
    Document, MemoryStore, MemoryStoreConnection, MemoryStoreManager, StoreOperation,
    cosine_similarity,
};

/// A row returned by a vector or full-text query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRow {
    pub id: String,
    pub content: String,
    pub metadata: serde_json::Value,
    pub source: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    /// Cosine similarity (vector queries) or raw rank (full-text queries).
    pub score: f32,
    /// Highlighted snippet (full-text queries only).
    pub highlight: Option<String>,
}

/// A row returned by the in-store hybrid query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridRow {
    pub row: DocumentRow,
    pub semantic_score: Option<f32>,
    /// Keyword rank normalised by the best rank of the keyword candidates.
    pub keyword_score: Option<f32>,
    pub combined_score: f32,
}

/// Nearest-neighbour query.
#[derive(Debug, Clone)]
pub struct VectorQuery {
    pub embedding: Vec<f32>,
    pub shape: QueryShape,
    /// Rows requested before the shape's over-fetch is applied.
    pub limit: usize,
    pub min_similarity: f32,
    pub filters: SearchFilters,
}

impl VectorQuery {
    /// Rows the store should return.
    pub fn fetch_limit(&self) -> usize {
        self.shape.candidate_limit(self.limit)
    }
}

/// Ranked full-text query over AND-joined terms.
#[derive(Debug, Clone)]
pub struct FullTextQuery {
    /// Normalised lowercase terms; every term must match.
    pub terms: Vec<String>,
    pub limit: usize,
    pub filters: SearchFilters,
    pub highlight: bool,
}

impl FullTextQuery {
    /// The `to_tsquery` expression for the terms.
    pub fn tsquery(&self) -> String {
        self.terms.join(" & ")
    }
}

/// Single-statement hybrid query (the `hybrid-sql` shape).
#[derive(Debug, Clone)]
pub struct HybridQuery {
    pub embedding: Vec<f32>,
    pub terms: Vec<String>,
    pub limit: usize,
    pub min_similarity: f32,
    pub semantic_weight: f32,
    pub keyword_weight: f32,
    pub filters: SearchFilters,
}

/// A pooled connection to the document store.
#[async_trait]
pub trait StoreConnection: Transactional {
    /// Rows ordered by descending similarity.
    async fn vector_query(&mut self, query: &VectorQuery) -> Result<Vec<DocumentRow>>;

    /// Rows ordered by descending rank.
    async fn full_text_query(&mut self, query: &FullTextQuery) -> Result<Vec<DocumentRow>>;

    /// Rows ordered by descending combined score.
    async fn hybrid_query(&mut self, query: &HybridQuery) -> Result<Vec<HybridRow>>;

    /// Run a statement that returns no rows (DDL, `ANALYZE`, `SET`).
    async fn execute(&mut self, statement: &str) -> Result<u64>;

    /// `EXPLAIN (ANALYZE, BUFFERS)` output of `statement` as text, with
    /// `params` bound to `$1`, `$2`, ... in order.
    async fn explain(&mut self, statement: &str, params: &[serde_json::Value]) -> Result<String>;

    /// Number of rows in the document table.
    async fn row_count(&mut self) -> Result<u64>;

    /// `SELECT 1`.
    async fn ping(&mut self) -> Result<()>;
}
