//! Tiered caching with a circuit-broken remote tier.
//!
//! - [`LocalTier`]: bounded in-process LRU
//! - [`RemoteCache`]: shared tier, usually reached through a
//!   [`ConnectionPool`](crate::pool::ConnectionPool)
//! - [`CircuitBreaker`]: fail-fast guard in front of the remote tier
//! - [`CacheManager`]: the two tiers behind one get/set/invalidate API
//! - [`cacheable`] and [`CacheInvalidator`]: helpers built on the manager

pub mod breaker;
pub mod cacheable;
pub mod config;
pub mod glob;
pub mod invalidator;
pub mod lru;
pub mod manager;
pub mod remote;
pub mod stats;

pub use breaker::{BreakerStatus, CircuitBreaker, CircuitState};
pub use cacheable::{Cached, cacheable};
pub use config::{BreakerConfig, CacheConfig};
pub use glob::GlobPattern;
pub use invalidator::CacheInvalidator;
pub use lru::{LocalLookup, LocalTier};
pub use manager::{CacheManager, ComputeOptions, GetOptions, WarmEntry};
pub use remote::{
    CacheConnection, MemoryCacheConnection, MemoryCacheManager, MemoryRemoteCache, RemoteCache,
};
pub use stats::{CacheCounters, CacheStats};
