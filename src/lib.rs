//! # Pilum
//!
//! The query-serving core of a retrieval-augmented-generation backend.
//!
//! ## Features
//!
//! - Pooled connections with retry, scoped release and per-pool metrics
//! - Two-tier cache whose remote tier sits behind a circuit breaker
//! - Hybrid search: concurrent semantic and keyword retrieval, weighted
//!   fusion, heuristic rerank and cached responses
//! - Query-shape selection and index tuning for pgvector-style stores
//! - An in-process store and remote cache for tests and single-process use

pub mod cache;
pub mod config;
pub mod core;
pub mod error;
pub mod index;
pub mod metrics;
pub mod pool;
pub mod search;
pub mod store;

pub mod prelude {
    pub use crate::cache::{CacheConfig, CacheManager, GetOptions};
    pub use crate::config::CoreConfig;
    pub use crate::core::{HealthStatus, RetrievalCore};
    pub use crate::error::{ErrorKind, PilumError, Result};
    pub use crate::pool::{ConnectionManager, ConnectionPool, PoolConfig};
    pub use crate::search::{
        Embedder, HybridSearchEngine, SearchMode, SearchOverrides, SearchQuery, SearchResponse,
        SearchResult,
    };
    pub use crate::store::StoreConnection;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
