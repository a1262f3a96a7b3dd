//! Traits implemented by the drivers behind a [`ConnectionPool`].
//!
//! [`ConnectionPool`]: crate::pool::ConnectionPool

use async_trait::async_trait;

use crate::error::Result;

/// Opens, checks and classifies physical connections for one dependency.
///
/// A pool owns exactly one manager. The relational store and the remote
/// cache each get their own manager and therefore their own pool.
#[async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    /// Driver-level connection handle.
    type Connection: Send + 'static;

    /// Open a new physical connection.
    ///
    /// Timeouts and refused connections should be reported with
    /// [`PilumError::connection`] so the pool retries them; authentication
    /// and configuration failures with [`PilumError::connection_rejected`].
    ///
    /// [`PilumError::connection`]: crate::error::PilumError::connection
    /// [`PilumError::connection_rejected`]: crate::error::PilumError::connection_rejected
    async fn connect(&self) -> Result<Self::Connection>;

    /// Round-trip check (`SELECT 1`, `PING`).
    async fn ping(&self, conn: &mut Self::Connection) -> Result<()>;

    /// Cheap synchronous check run before an idle connection is reused and
    /// when a connection is returned.
    fn is_broken(&self, _conn: &Self::Connection) -> bool {
        false
    }
}

/// Connections that support explicit transactions.
#[async_trait]
pub trait Transactional: Send {
    /// Start a transaction.
    async fn begin(&mut self) -> Result<()>;

    /// Commit the current transaction.
    async fn commit(&mut self) -> Result<()>;

    /// Roll back the current transaction.
    async fn rollback(&mut self) -> Result<()>;
}
