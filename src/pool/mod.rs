//! Connection pooling for the relational store and the remote cache.
//!
//! Each external dependency gets its own [`ConnectionPool`] built from a
//! [`ConnectionManager`] and a [`PoolConfig`]. Connections are handed out
//! as [`PooledConnection`] guards that go back to the pool exactly once.

pub mod config;
pub mod manager;
#[allow(clippy::module_inception)]
pub mod pool;
pub mod metrics;
pub mod retry;

pub use config::PoolConfig;
pub use manager::{ConnectionManager, Transactional};
pub use metrics::{ErrorRecord, PoolMetrics, PoolStats};
pub use pool::{ConnectionPool, PooledConnection};
pub use retry::RetryPolicy;
