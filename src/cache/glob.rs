//! `*` wildcard patterns over cache keys.

use regex::Regex;

use crate::error::{PilumError, Result};

/// A compiled glob pattern. `*` matches any run of characters (including
/// none); every other character matches itself.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
}

impl GlobPattern {
    /// Compile `pattern`.
    pub fn new(pattern: &str) -> Result<Self> {
        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = Regex::new(&format!("^{body}$"))
            .map_err(|e| PilumError::invalid_query(format!("bad pattern '{pattern}': {e}")))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether `key` matches.
    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_matching() {
        let pattern = GlobPattern::new("pilum:search:*").unwrap();
        assert!(pattern.matches("pilum:search:abc"));
        assert!(pattern.matches("pilum:search:"));
        assert!(!pattern.matches("pilum:embedding:abc"));

        let pattern = GlobPattern::new("*:doc-1:*").unwrap();
        assert!(pattern.matches("pilum:doc-1:chunks"));
        assert!(!pattern.matches("pilum:doc-12"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let pattern = GlobPattern::new("q.(a)+*").unwrap();
        assert!(pattern.matches("q.(a)+anything"));
        assert!(!pattern.matches("qx(a)+anything"));
    }
}
