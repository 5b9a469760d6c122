//! Cache invalidation by operation name or operation-name prefix.
//!
//! Mutations call into the engine after the transport reports success and
//! before the mutation returns, so any read issued afterwards misses.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::CacheStore;
use crate::error::QueryError;
use crate::fingerprint::CacheKey;

/// Which cached operations to drop.
///
/// Parsed from strings: `"GetAccounts"` is exact, `"GetAccount*"` is a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum InvalidationPattern {
    Exact(String),
    Prefix(String),
}

impl InvalidationPattern {
    pub fn exact(operation: impl Into<String>) -> Self {
        InvalidationPattern::Exact(operation.into())
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        InvalidationPattern::Prefix(prefix.into())
    }

    pub fn matches_operation(&self, operation: &str) -> bool {
        match self {
            InvalidationPattern::Exact(name) => operation == name,
            InvalidationPattern::Prefix(prefix) => operation.starts_with(prefix.as_str()),
        }
    }

    pub fn matches(&self, key: &CacheKey) -> bool {
        self.matches_operation(key.operation())
    }
}

impl FromStr for InvalidationPattern {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let name = trimmed.strip_suffix('*').unwrap_or(trimmed);

        // A bare "*" would wipe everything; clear_cache exists for that.
        if name.is_empty() {
            let message = format!("invalidation pattern '{trimmed}' is empty");
            return Err(QueryError::invalid_input(message));
        }

        Ok(match trimmed.strip_suffix('*') {
            Some(prefix) => InvalidationPattern::Prefix(prefix.to_string()),
            None => InvalidationPattern::Exact(trimmed.to_string()),
        })
    }
}

impl TryFrom<String> for InvalidationPattern {
    type Error = QueryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<InvalidationPattern> for String {
    fn from(pattern: InvalidationPattern) -> Self {
        pattern.to_string()
    }
}

impl fmt::Display for InvalidationPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidationPattern::Exact(name) => f.write_str(name),
            InvalidationPattern::Prefix(prefix) => write!(f, "{prefix}*"),
        }
    }
}

/// Configured mapping from mutation name to the patterns it invalidates.
#[derive(Debug, Clone, Default)]
pub struct InvalidationRules {
    rules: HashMap<String, Vec<InvalidationPattern>>,
}

impl InvalidationRules {
    pub fn new(rules: HashMap<String, Vec<InvalidationPattern>>) -> Self {
        Self { rules }
    }

    pub fn with_rule(
        mut self,
        mutation: impl Into<String>,
        patterns: impl IntoIterator<Item = InvalidationPattern>,
    ) -> Self {
        self.rules
            .entry(mutation.into())
            .or_default()
            .extend(patterns);
        self
    }

    pub fn patterns_for(&self, mutation: &str) -> &[InvalidationPattern] {
        self.rules.get(mutation).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Removes cache entries by operation name or prefix.
#[derive(Debug, Clone)]
pub struct InvalidationEngine {
    store: Arc<CacheStore>,
}

impl InvalidationEngine {
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self { store }
    }

    /// Removes every entry derived from an operation matching `pattern`.
    /// Returns the number of removed entries.
    pub fn invalidate(&self, pattern: &InvalidationPattern) -> usize {
        let removed = self.store.invalidate(|key| pattern.matches(key));
        debug!(%pattern, removed, "invalidated cache entries");
        removed
    }

    /// Applies several patterns in one pass over the store.
    pub fn invalidate_all(&self, patterns: &[InvalidationPattern]) -> usize {
        if patterns.is_empty() {
            return 0;
        }
        let removed = self
            .store
            .invalidate(|key| patterns.iter().any(|p| p.matches(key)));
        debug!(
            patterns = patterns.len(),
            removed,
            "invalidated cache entries"
        );
        removed
    }
}
