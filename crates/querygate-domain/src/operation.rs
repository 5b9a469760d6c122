//! Operation requests as handed to the gate by the calling layer.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::QueryError;
use crate::invalidation::InvalidationPattern;
use crate::volatility::VolatilityClass;

/// Whether an operation reads or changes remote state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Read,
    Mutation,
}

/// A single named operation with its variables.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub operation: String,
    pub variables: Value,
    pub volatility: VolatilityClass,
    pub kind: QueryKind,
    /// Patterns to invalidate after a successful mutation, on top of any
    /// configured rules for this operation.
    pub invalidates: Vec<InvalidationPattern>,
    /// Per-call transport deadline; falls back to the configured timeout.
    pub timeout: Option<Duration>,
    /// Skip the cache lookup but still store the fresh result.
    pub force_refresh: bool,
}

impl QueryRequest {
    /// Creates a cacheable read.
    pub fn read(
        operation: impl Into<String>,
        variables: Value,
        volatility: VolatilityClass,
    ) -> Self {
        Self {
            operation: operation.into(),
            variables,
            volatility,
            kind: QueryKind::Read,
            invalidates: Vec::new(),
            timeout: None,
            force_refresh: false,
        }
    }

    /// Creates a mutation. Mutations are never cached.
    pub fn mutation(operation: impl Into<String>, variables: Value) -> Self {
        Self {
            operation: operation.into(),
            variables,
            volatility: VolatilityClass::Short,
            kind: QueryKind::Mutation,
            invalidates: Vec::new(),
            timeout: None,
            force_refresh: false,
        }
    }

    /// Adds a pattern to invalidate once this mutation succeeds.
    pub fn invalidates(mut self, pattern: InvalidationPattern) -> Self {
        self.invalidates.push(pattern);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }

    pub fn is_mutation(&self) -> bool {
        self.kind == QueryKind::Mutation
    }
}

/// Field-selection depth for operations that come in several shapes.
///
/// Resolved once at the call boundary into a concrete operation name, so
/// each shape is cached and invalidated as its own operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    /// Identifiers and display names only.
    Basic,
    /// Basic fields plus balances.
    Balance,
    /// Every field.
    #[default]
    Full,
}

impl DetailLevel {
    /// Maps a base operation name to the operation for this level,
    /// e.g. `GetAccounts` becomes `GetAccountsBasic`.
    pub fn operation_for(self, base: &str) -> String {
        match self {
            DetailLevel::Basic => format!("{base}Basic"),
            DetailLevel::Balance => format!("{base}Balance"),
            DetailLevel::Full => base.to_string(),
        }
    }
}

impl FromStr for DetailLevel {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(DetailLevel::Basic),
            "balance" => Ok(DetailLevel::Balance),
            "full" => Ok(DetailLevel::Full),
            other => Err(QueryError::invalid_input(format!(
                "unknown detail level '{other}', expected basic, balance or full"
            ))),
        }
    }
}
