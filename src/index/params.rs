//! Approximate-nearest-neighbour index parameters.

use futures::FutureExt;
use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{PilumError, Result};
use crate::pool::{ConnectionManager, ConnectionPool};
use crate::store::StoreConnection;

/// Smallest IVFFlat list count recommended.
pub const MIN_LISTS: u32 = 100;
/// Largest IVFFlat list count recommended.
pub const MAX_LISTS: u32 = 5000;
/// Row count above which larger HNSW graphs are recommended.
pub const LARGE_TABLE_ROWS: u64 = 1_000_000;

/// The index family and its build parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IndexKind {
    /// List-partitioned index (pgvector `ivfflat`).
    IvfFlat { lists: u32 },
    /// Graph index (pgvector `hnsw`).
    Hnsw { m: u32, ef_construction: u32 },
}

impl IndexKind {
    pub fn method(&self) -> &'static str {
        match self {
            IndexKind::IvfFlat { .. } => "ivfflat",
            IndexKind::Hnsw { .. } => "hnsw",
        }
    }

    fn with_clause(&self) -> String {
        match self {
            IndexKind::IvfFlat { lists } => format!("lists = {lists}"),
            IndexKind::Hnsw { m, ef_construction } => {
                format!("m = {m}, ef_construction = {ef_construction}")
            }
        }
    }
}

/// Index-build configuration. Only used when building indexes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub table: String,
    pub kind: IndexKind,
}

impl IndexConfig {
    pub fn new<S: Into<String>>(table: S, kind: IndexKind) -> Self {
        Self {
            table: table.into(),
            kind,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.table.is_empty()
            || !self
                .table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        {
            return Err(PilumError::invalid_config(format!(
                "invalid table name '{}'",
                self.table
            )));
        }
        match self.kind {
            IndexKind::IvfFlat { lists } if lists == 0 => Err(PilumError::invalid_config(
                "ivfflat lists must be greater than 0",
            )),
            IndexKind::Hnsw { m, ef_construction } if m < 2 || ef_construction < m => {
                Err(PilumError::invalid_config(
                    "hnsw requires m >= 2 and ef_construction >= m",
                ))
            }
            _ => Ok(()),
        }
    }

    /// Name of the vector index.
    pub fn index_name(&self) -> String {
        format!("{}_embedding_{}_idx", self.table.replace('.', "_"), self.kind.method())
    }

    /// `CREATE INDEX` statement for the vector index.
    pub fn create_index_sql(&self) -> String {
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} USING {} (embedding vector_cosine_ops) WITH ({})",
            self.index_name(),
            self.table,
            self.kind.method(),
            self.kind.with_clause()
        )
    }

    /// Statements for the full-text, metadata and date indexes every query
    /// shape relies on.
    pub fn supporting_index_sql(&self) -> Vec<String> {
        let prefix = self.table.replace('.', "_");
        vec![
            format!(
                "CREATE INDEX IF NOT EXISTS {prefix}_content_fts_idx ON {} USING gin (to_tsvector('english', content))",
                self.table
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {prefix}_metadata_idx ON {} USING gin (metadata jsonb_path_ops)",
                self.table
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {prefix}_created_at_idx ON {} (created_at DESC)",
                self.table
            ),
        ]
    }

    /// Session setting that tunes query-time recall for the index.
    pub fn session_setting_sql(&self) -> String {
        match self.kind {
            IndexKind::IvfFlat { lists } => {
                format!("SET ivfflat.probes = {}", (lists / 10).clamp(1, 100))
            }
            IndexKind::Hnsw { ef_construction, .. } => {
                format!("SET hnsw.ef_search = {}", (ef_construction / 2).max(40))
            }
        }
    }
}

/// IVFFlat list count for `row_count` rows:
/// `clamp(max(sqrt(n), n / 1000), 100, 5000)`.
pub fn recommend_lists(row_count: u64) -> u32 {
    let sqrt = (row_count as f64).sqrt() as u64;
    let per_thousand = row_count / 1000;
    sqrt.max(per_thousand).clamp(MIN_LISTS as u64, MAX_LISTS as u64) as u32
}

/// Recommended index for a table of `row_count` rows.
///
/// Tables up to [`LARGE_TABLE_ROWS`] get an HNSW graph with `m = 16`,
/// `ef_construction = 200`; larger tables get a denser graph.
pub fn recommend_index_params(table: &str, row_count: u64) -> IndexConfig {
    let kind = if row_count > LARGE_TABLE_ROWS {
        IndexKind::Hnsw {
            m: 32,
            ef_construction: 400,
        }
    } else {
        IndexKind::Hnsw {
            m: 16,
            ef_construction: 200,
        }
    };
    IndexConfig::new(table, kind)
}

/// IVFFlat alternative to [`recommend_index_params`].
pub fn recommend_ivfflat_params(table: &str, row_count: u64) -> IndexConfig {
    IndexConfig::new(
        table,
        IndexKind::IvfFlat {
            lists: recommend_lists(row_count),
        },
    )
}

/// Build the vector index and its supporting indexes in one transaction,
/// then refresh planner statistics. Returns the statements executed.
pub async fn apply_index<M>(pool: &ConnectionPool<M>, config: &IndexConfig) -> Result<Vec<String>>
where
    M: ConnectionManager,
    M::Connection: StoreConnection,
{
    config.validate()?;

    let mut statements = vec![config.create_index_sql()];
    statements.extend(config.supporting_index_sql());
    statements.push(format!("ANALYZE {}", config.table));

    let to_run = statements.clone();
    pool.with_transaction(move |conn| {
        async move {
            for statement in &to_run {
                conn.execute(statement).await?;
            }
            Ok(())
        }
        .boxed()
    })
    .await?;

    info!(
        "built {} index '{}' on {}",
        config.kind.method(),
        config.index_name(),
        config.table
    );
    Ok(statements)
}
