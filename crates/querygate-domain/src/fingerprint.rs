//! Deterministic cache keys for (operation, variables) pairs.
//!
//! Variables are rendered into a canonical JSON form with object keys sorted
//! at every depth before hashing, so two logically equal variable sets always
//! produce the same key no matter how they were built.

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{QueryError, QueryResult};

/// Cache key derived from an operation name and its variables.
///
/// The operation name is kept in clear so invalidation can match on it;
/// the variables only survive as a SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    operation: String,
    digest: String,
}

impl CacheKey {
    /// The operation name this key was derived from.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Hex-encoded digest of the operation and its canonical variables.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.operation, self.digest)
    }
}

/// Derives the cache key for `operation` called with `variables`.
///
/// `Value::Null` is treated as the empty variable set. Any other non-object
/// value, or an empty operation name, is rejected.
pub fn fingerprint(operation: &str, variables: &Value) -> QueryResult<CacheKey> {
    if operation.trim().is_empty() {
        return Err(QueryError::invalid_input("operation name cannot be empty"));
    }

    let mut canonical = String::new();
    match variables {
        Value::Null => canonical.push_str("{}"),
        Value::Object(_) => write_canonical(variables, &mut canonical),
        other => {
            return Err(QueryError::invalid_input(format!(
                "variables for '{operation}' must be an object, got {}",
                kind_of(other)
            )));
        }
    }

    let mut hasher = Sha256::new();
    hasher.update(operation.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical.as_bytes());

    Ok(CacheKey {
        operation: operation.to_string(),
        digest: hex::encode(hasher.finalize()),
    })
}

/// Serializes `variables` and derives the cache key for them.
///
/// Fails with `InvalidInput` when the value cannot be represented as JSON
/// (for example a map with non-string keys).
pub fn fingerprint_serialized<T>(operation: &str, variables: &T) -> QueryResult<CacheKey>
where
    T: Serialize + ?Sized,
{
    let value = serde_json::to_value(variables).map_err(|e| {
        let message = format!("variables for '{operation}' are not serializable: {e}");
        QueryError::invalid_input(message)
    })?;
    fingerprint(operation, &value)
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
