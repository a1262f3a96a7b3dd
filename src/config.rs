//! Top-level configuration for the retrieval core.
//!
//! [`CoreConfig`] aggregates the per-concern configurations and can be
//! loaded from JSON. Durations are written as integer milliseconds.
//!
//! ```
//! use pilum::config::CoreConfig;
//!
//! let config = CoreConfig::from_json_str(r#"{
//!     "store_pool": { "name": "postgres", "max_size": 10 },
//!     "cache": { "default_ttl": 600000 },
//!     "search": { "max_limit": 50 }
//! }"#).unwrap();
//!
//! assert_eq!(config.store_pool.max_size, 10);
//! assert_eq!(config.cache.default_ttl.as_secs(), 600);
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::error::Result;
use crate::pool::PoolConfig;
use crate::search::SearchConfig;

/// Configuration of the whole retrieval core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Pool for the relational/vector store.
    pub store_pool: PoolConfig,
    /// Pool for the remote cache tier.
    pub cache_pool: PoolConfig,
    /// Cache manager settings.
    pub cache: CacheConfig,
    /// Search engine settings.
    pub search: SearchConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            store_pool: PoolConfig::new("store"),
            cache_pool: PoolConfig::new("cache").with_max_size(10),
            cache: CacheConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Parse a configuration from JSON and validate it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: CoreConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file and validate it.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.store_pool.validate()?;
        self.cache_pool.validate()?;
        self.cache.validate()?;
        self.search.validate()
    }
}

/// Serde helpers for `Duration` fields stored as integer milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PilumError;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_defaults_are_valid() {
        let config = CoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store_pool.name, "store");
        assert_eq!(config.cache_pool.max_size, 10);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = CoreConfig::from_json_str(
            r#"{"cache_pool": {"name": "redis", "acquire_timeout": 750}}"#,
        )
        .unwrap();
        assert_eq!(config.cache_pool.name, "redis");
        assert_eq!(config.cache_pool.acquire_timeout, Duration::from_millis(750));
        assert_eq!(config.store_pool.max_size, 20);
        assert_eq!(config.search.default_options.limit, 10);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = CoreConfig::from_json_str(r#"{"store_pool": {"max_size": 0}}"#).unwrap_err();
        assert!(matches!(err, PilumError::InvalidConfig(_)));

        let err = CoreConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, PilumError::Json(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"search": {{"max_limit": 25}}}}"#).unwrap();

        let config = CoreConfig::from_file(file.path()).unwrap();
        assert_eq!(config.search.max_limit, 25);

        let missing = CoreConfig::from_file("/nonexistent/pilum.json").unwrap_err();
        assert!(matches!(missing, PilumError::Io(_)));
    }
}
