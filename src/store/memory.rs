//! In-process implementation of the store contract.
//!
//! Vector queries use exact cosine similarity, full-text queries rank
//! AND-matched terms by term frequency with `<mark>` highlights, and
//! statements run inside a transaction are buffered until commit. Index
//! DDL is recorded so explain plans reflect which indexes exist.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use ahash::AHashMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

use crate::error::{PilumError, Result};
use crate::pool::{ConnectionManager, Transactional};
use crate::store::{
    DocumentRow, FullTextQuery, HybridQuery, HybridRow, StoreConnection, VectorQuery,
};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$(\d+)").unwrap());

/// Highest `$n` placeholder in `statement`, 0 when there is none.
fn highest_placeholder(statement: &str) -> usize {
    PLACEHOLDER
        .captures_iter(statement)
        .filter_map(|c| c.get(1)?.as_str().parse::<usize>().ok())
        .max()
        .unwrap_or(0)
}

/// Words kept in a highlight snippet.
const SNIPPET_WORDS: usize = 35;
/// Words of context before the first match in a snippet.
const SNIPPET_LEAD: usize = 5;

/// A stored document chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: serde_json::Value,
    pub source: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Document {
    pub fn new<I: Into<String>, C: Into<String>>(id: I, content: C, embedding: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            embedding,
            metadata: serde_json::Value::Object(Default::default()),
            source: None,
            created_at: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_source<S: Into<String>>(mut self, source: S) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    fn row(&self, score: f32, highlight: Option<String>) -> DocumentRow {
        DocumentRow {
            id: self.id.clone(),
            content: self.content.clone(),
            metadata: self.metadata.clone(),
            source: self.source.clone(),
            created_at: self.created_at,
            score,
            highlight,
        }
    }

    fn passes(&self, filters: &crate::search::SearchFilters, with_metadata: bool) -> bool {
        if with_metadata {
            filters.matches(self.source.as_deref(), self.created_at, &self.metadata)
        } else {
            let without_metadata = crate::search::SearchFilters {
                metadata: None,
                ..filters.clone()
            };
            without_metadata.matches(self.source.as_deref(), self.created_at, &self.metadata)
        }
    }
}

/// Operations that can be made to fail for fault-injection tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Connect,
    VectorQuery,
    FullTextQuery,
    HybridQuery,
    Execute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexKind {
    Vector,
    FullText,
    Other,
}

#[derive(Debug, Clone)]
enum Statement {
    CreateIndex { name: String, kind: IndexKind },
    DropIndex { name: String },
    Maintenance,
}

impl Statement {
    fn parse(statement: &str) -> Result<Self> {
        let upper = statement.trim().to_uppercase();
        let tokens: Vec<&str> = statement.split_whitespace().collect();
        let name_after = |skip: usize| -> Result<String> {
            let mut idx = skip;
            if upper.split_whitespace().nth(idx) == Some("IF") {
                idx += if upper.contains("IF NOT EXISTS") { 3 } else { 2 };
            }
            tokens
                .get(idx)
                .map(|name| name.trim_end_matches(';').to_string())
                .ok_or_else(|| PilumError::query(format!("missing index name in '{statement}'")))
        };

        if upper.starts_with("CREATE INDEX") || upper.starts_with("CREATE UNIQUE INDEX") {
            let skip = if upper.starts_with("CREATE UNIQUE") { 3 } else { 2 };
            let kind = if upper.contains("IVFFLAT") || upper.contains("HNSW") {
                IndexKind::Vector
            } else if upper.contains("TO_TSVECTOR") {
                IndexKind::FullText
            } else {
                IndexKind::Other
            };
            Ok(Statement::CreateIndex {
                name: name_after(skip)?,
                kind,
            })
        } else if upper.starts_with("DROP INDEX") {
            Ok(Statement::DropIndex {
                name: name_after(2)?,
            })
        } else if upper.starts_with("ANALYZE")
            || upper.starts_with("SET ")
            || upper.starts_with("SELECT 1")
            || upper.starts_with("VACUUM")
        {
            Ok(Statement::Maintenance)
        } else {
            Err(PilumError::query(format!(
                "unsupported statement: {}",
                statement.trim()
            )))
        }
    }
}

#[derive(Default)]
struct StoreState {
    documents: Vec<Document>,
    positions: HashMap<String, usize>,
    indexes: HashMap<String, IndexKind>,
    ddl_log: Vec<String>,
}

impl StoreState {
    fn apply(&mut self, statement: &Statement, text: &str) {
        match statement {
            Statement::CreateIndex { name, kind } => {
                self.indexes.insert(name.clone(), *kind);
            }
            Statement::DropIndex { name } => {
                self.indexes.remove(name);
            }
            Statement::Maintenance => {}
        }
        self.ddl_log.push(text.trim().to_string());
    }

    fn index_of(&self, kind: IndexKind) -> Option<&str> {
        let mut names: Vec<&String> = self
            .indexes
            .iter()
            .filter(|(_, k)| **k == kind)
            .map(|(name, _)| name)
            .collect();
        names.sort();
        names.first().map(|name| name.as_str())
    }
}

#[derive(Default)]
struct Faults {
    failing: Mutex<HashSet<StoreOperation>>,
    latency: Mutex<Duration>,
}

/// In-process document store. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<StoreState>>,
    faults: Arc<Faults>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document.
    pub fn insert(&self, document: Document) {
        let mut state = self.state.write();
        match state.positions.get(&document.id).copied() {
            Some(pos) => state.documents[pos] = document,
            None => {
                let pos = state.documents.len();
                state.positions.insert(document.id.clone(), pos);
                state.documents.push(document);
            }
        }
    }

    /// Insert many documents.
    pub fn insert_many<I: IntoIterator<Item = Document>>(&self, documents: I) {
        for document in documents {
            self.insert(document);
        }
    }

    /// Remove a document. Returns whether it existed.
    pub fn remove(&self, id: &str) -> bool {
        let mut state = self.state.write();
        let Some(pos) = state.positions.remove(id) else {
            return false;
        };
        state.documents.remove(pos);
        let StoreState {
            documents,
            positions,
            ..
        } = &mut *state;
        for (i, doc) in documents.iter().enumerate().skip(pos) {
            positions.insert(doc.id.clone(), i);
        }
        true
    }

    /// Number of documents.
    pub fn len(&self) -> usize {
        self.state.read().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every statement applied so far, in order.
    pub fn ddl_log(&self) -> Vec<String> {
        self.state.read().ddl_log.clone()
    }

    /// Names of the existing indexes, sorted.
    pub fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.read().indexes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether an ivfflat or hnsw index exists.
    pub fn has_vector_index(&self) -> bool {
        self.state.read().index_of(IndexKind::Vector).is_some()
    }

    /// Make `operation` fail (or succeed again).
    pub fn set_failing(&self, operation: StoreOperation, failing: bool) {
        let mut set = self.faults.failing.lock();
        if failing {
            set.insert(operation);
        } else {
            set.remove(&operation);
        }
    }

    /// Delay every query by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.faults.latency.lock() = latency;
    }

    async fn enter(&self, operation: StoreOperation) -> Result<()> {
        let latency = *self.faults.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.faults.failing.lock().contains(&operation) {
            return Err(match operation {
                StoreOperation::Connect => PilumError::connection("store connection refused"),
                _ => PilumError::query(format!("{operation:?} failed")),
            });
        }
        Ok(())
    }

    fn vector_rows(&self, query: &VectorQuery) -> Result<Vec<DocumentRow>> {
        let state = self.state.read();
        let mut rows = Vec::new();
        for doc in &state.documents {
            if !doc.passes(&query.filters, query.shape.applies_metadata_filter()) {
                continue;
            }
            let similarity = cosine_similarity(&query.embedding, &doc.embedding)?;
            if query.shape.applies_threshold() && similarity < query.min_similarity {
                continue;
            }
            rows.push(doc.row(similarity, None));
        }
        sort_rows(&mut rows);
        rows.truncate(query.fetch_limit());
        Ok(rows)
    }

    fn full_text_rows(&self, query: &FullTextQuery) -> Vec<DocumentRow> {
        if query.terms.is_empty() {
            return Vec::new();
        }
        let state = self.state.read();
        let mut rows = Vec::new();
        for doc in &state.documents {
            if !doc.passes(&query.filters, true) {
                continue;
            }
            if let Some(rank) = rank(&doc.content, &query.terms) {
                let highlight = query
                    .highlight
                    .then(|| highlight(&doc.content, &query.terms));
                rows.push(doc.row(rank, highlight));
            }
        }
        sort_rows(&mut rows);
        rows.truncate(query.limit);
        rows
    }

    fn hybrid_rows(&self, query: &HybridQuery) -> Result<Vec<HybridRow>> {
        let candidates = query.limit.saturating_mul(2);
        let vector = self.vector_rows(&VectorQuery {
            embedding: query.embedding.clone(),
            shape: crate::index::QueryShape::Filtered,
            limit: candidates,
            min_similarity: query.min_similarity,
            filters: query.filters.clone(),
        })?;
        let keyword = self.full_text_rows(&FullTextQuery {
            terms: query.terms.clone(),
            limit: candidates,
            filters: query.filters.clone(),
            highlight: true,
        });
        let max_rank = keyword.iter().map(|r| r.score).fold(0.0_f32, f32::max);

        let mut combined: AHashMap<String, HybridRow> = AHashMap::new();
        for row in vector {
            let semantic = row.score;
            combined.insert(
                row.id.clone(),
                HybridRow {
                    row,
                    semantic_score: Some(semantic),
                    keyword_score: None,
                    combined_score: 0.0,
                },
            );
        }
        for row in keyword {
            let normalized = if max_rank > 0.0 { row.score / max_rank } else { 0.0 };
            combined
                .entry(row.id.clone())
                .and_modify(|hybrid| {
                    hybrid.keyword_score = Some(normalized);
                    hybrid.row.highlight = row.highlight.clone();
                })
                .or_insert(HybridRow {
                    row,
                    semantic_score: None,
                    keyword_score: Some(normalized),
                    combined_score: 0.0,
                });
        }

        let mut rows: Vec<HybridRow> = combined
            .into_values()
            .map(|mut hybrid| {
                hybrid.combined_score = hybrid.semantic_score.unwrap_or(0.0) * query.semantic_weight
                    + hybrid.keyword_score.unwrap_or(0.0) * query.keyword_weight;
                hybrid.row.score = hybrid.combined_score;
                hybrid
            })
            .collect();
        rows.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.row.id.cmp(&b.row.id))
        });
        rows.truncate(query.limit);
        Ok(rows)
    }

    fn explain_plan(&self, statement: &str) -> String {
        let state = self.state.read();
        let rows = state.documents.len() as u64;
        let scan = if statement.contains("<=>") {
            state.index_of(IndexKind::Vector)
        } else if statement.contains("@@") {
            state.index_of(IndexKind::FullText)
        } else {
            None
        };

        let (node, hit, read, execution_ms) = match scan {
            Some(index) => (
                format!("Index Scan using {index} on embeddings"),
                rows.max(1),
                0,
                0.1 + rows as f64 * 0.002,
            ),
            None => {
                let hit = rows / 4;
                (
                    "Seq Scan on embeddings".to_string(),
                    hit,
                    rows - hit,
                    rows as f64 * 0.02,
                )
            }
        };

        format!(
            "Limit  (actual time=0.010..{execution_ms:.3} rows={rows} loops=1)\n  \
             ->  {node}  (actual time=0.010..{execution_ms:.3} rows={rows} loops=1)\n        \
             Buffers: shared hit={hit} read={read}\n\
             Planning Time: 0.120 ms\n\
             Execution Time: {execution_ms:.3} ms"
        )
    }
}

fn sort_rows(rows: &mut [DocumentRow]) {
    rows.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Cosine similarity `1 - cosine_distance`, as pgvector's `1 - (a <=> b)`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(PilumError::query(format!(
            "different vector dimensions {} and {}",
            a.len(),
            b.len()
        )));
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0_f32, 0.0_f32, 0.0_f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Term-frequency rank when every term occurs, `None` otherwise.
fn rank(content: &str, terms: &[String]) -> Option<f32> {
    let mut counts: AHashMap<String, u32> = AHashMap::new();
    let mut words = 0_u32;
    for word in content.unicode_words() {
        words += 1;
        *counts.entry(word.to_lowercase()).or_default() += 1;
    }
    let mut total = 0_u32;
    for term in terms {
        let count = counts.get(term).copied().unwrap_or(0);
        if count == 0 {
            return None;
        }
        total += count;
    }
    Some(total as f32 / (1.0 + (words.max(1) as f32).ln()))
}

/// Snippet around the first match with matched words in `<mark>` tags.
fn highlight(content: &str, terms: &[String]) -> String {
    let segments: Vec<&str> = content.split_word_bounds().collect();
    let is_word = |s: &str| s.chars().any(char::is_alphanumeric);
    let is_match = |s: &str| terms.iter().any(|t| *t == s.to_lowercase());

    let word_positions: Vec<usize> = segments
        .iter()
        .enumerate()
        .filter(|(_, s)| is_word(s))
        .map(|(i, _)| i)
        .collect();
    let first_match = word_positions
        .iter()
        .position(|&i| is_match(segments[i]))
        .unwrap_or(0);
    let first_word = first_match.saturating_sub(SNIPPET_LEAD);
    let last_word = (first_word + SNIPPET_WORDS).min(word_positions.len());

    let (start, end) = match (word_positions.get(first_word), last_word) {
        (Some(&start), last) if last > 0 => (start, word_positions[last - 1] + 1),
        _ => (0, segments.len()),
    };

    let mut snippet = String::with_capacity(content.len() + 16);
    if start > 0 {
        snippet.push_str("...");
    }
    for segment in &segments[start..end] {
        if is_word(segment) && is_match(segment) {
            snippet.push_str("<mark>");
            snippet.push_str(segment);
            snippet.push_str("</mark>");
        } else {
            snippet.push_str(segment);
        }
    }
    if last_word < word_positions.len() {
        snippet.push_str("...");
    }
    snippet
}

/// Hands out connections to a shared [`MemoryStore`].
#[derive(Clone)]
pub struct MemoryStoreManager {
    store: MemoryStore,
}

impl MemoryStoreManager {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

#[async_trait]
impl ConnectionManager for MemoryStoreManager {
    type Connection = MemoryStoreConnection;

    async fn connect(&self) -> Result<MemoryStoreConnection> {
        self.store.enter(StoreOperation::Connect).await?;
        Ok(MemoryStoreConnection {
            store: self.store.clone(),
            transaction: None,
        })
    }

    async fn ping(&self, conn: &mut MemoryStoreConnection) -> Result<()> {
        StoreConnection::ping(conn).await
    }

    fn is_broken(&self, conn: &MemoryStoreConnection) -> bool {
        // A connection must never go back to the pool mid-transaction.
        conn.transaction.is_some()
    }
}

/// A connection produced by [`MemoryStoreManager`].
pub struct MemoryStoreConnection {
    store: MemoryStore,
    transaction: Option<Vec<(Statement, String)>>,
}

impl MemoryStoreConnection {
    /// Whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }
}

#[async_trait]
impl Transactional for MemoryStoreConnection {
    async fn begin(&mut self) -> Result<()> {
        if self.transaction.is_some() {
            return Err(PilumError::transaction("transaction already in progress"));
        }
        self.transaction = Some(Vec::new());
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let pending = self
            .transaction
            .take()
            .ok_or_else(|| PilumError::transaction("no transaction in progress"))?;
        let mut state = self.store.state.write();
        for (statement, text) in &pending {
            state.apply(statement, text);
        }
        debug!("memory store: committed {} statements", pending.len());
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        match self.transaction.take() {
            Some(pending) => {
                debug!("memory store: rolled back {} statements", pending.len());
                Ok(())
            }
            None => Err(PilumError::transaction("no transaction in progress")),
        }
    }
}

#[async_trait]
impl StoreConnection for MemoryStoreConnection {
    async fn vector_query(&mut self, query: &VectorQuery) -> Result<Vec<DocumentRow>> {
        self.store.enter(StoreOperation::VectorQuery).await?;
        self.store.vector_rows(query)
    }

    async fn full_text_query(&mut self, query: &FullTextQuery) -> Result<Vec<DocumentRow>> {
        self.store.enter(StoreOperation::FullTextQuery).await?;
        Ok(self.store.full_text_rows(query))
    }

    async fn hybrid_query(&mut self, query: &HybridQuery) -> Result<Vec<HybridRow>> {
        self.store.enter(StoreOperation::HybridQuery).await?;
        self.store.hybrid_rows(query)
    }

    async fn execute(&mut self, statement: &str) -> Result<u64> {
        self.store.enter(StoreOperation::Execute).await?;
        let parsed = Statement::parse(statement)?;
        match &mut self.transaction {
            Some(pending) => pending.push((parsed, statement.to_string())),
            None => self.store.state.write().apply(&parsed, statement),
        }
        Ok(0)
    }

    async fn explain(&mut self, statement: &str, params: &[serde_json::Value]) -> Result<String> {
        self.store.enter(StoreOperation::Execute).await?;
        let needed = highest_placeholder(statement);
        if needed > params.len() {
            return Err(PilumError::query(format!(
                "statement references ${needed} but {} parameters were bound",
                params.len()
            )));
        }
        Ok(self.store.explain_plan(statement))
    }

    async fn row_count(&mut self) -> Result<u64> {
        Ok(self.store.len() as u64)
    }

    async fn ping(&mut self) -> Result<()> {
        self.store.enter(StoreOperation::Connect).await
    }
}
