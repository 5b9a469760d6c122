//! The remote execution collaborator.
//!
//! Implementations own authentication, retries and backoff. The gate only
//! decides whether and when to call them, and bounds every call with a
//! deadline.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use crate::error::{QueryError, QueryResult, TransportError};

/// One operation inside a grouped transport call.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationCall {
    pub operation: String,
    pub variables: Value,
}

impl OperationCall {
    pub fn new(operation: impl Into<String>, variables: Value) -> Self {
        Self {
            operation: operation.into(),
            variables,
        }
    }
}

/// Executes named operations against the remote service.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Executes a single operation. `deadline` is advisory; the gate
    /// enforces it regardless.
    async fn run(
        &self,
        operation: &str,
        variables: &Value,
        deadline: Instant,
    ) -> Result<Value, TransportError>;

    /// Whether [`Transport::run_batch`] is implemented.
    fn supports_batch(&self) -> bool {
        false
    }

    /// Executes several operations in one round trip.
    ///
    /// Results must be aligned by position with `calls`. An outer error
    /// fails every call in the group.
    async fn run_batch(
        &self,
        calls: &[OperationCall],
        deadline: Instant,
    ) -> Result<Vec<Result<Value, TransportError>>, TransportError> {
        let _ = (calls, deadline);
        Err(TransportError::fatal("transport does not support grouped calls"))
    }
}

/// Upper bound for a deadline, about thirty years out.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Deadline `timeout` from now. Timeouts too large to represent, such as
/// `Duration::MAX`, are capped at about thirty years.
pub fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout.min(FAR_FUTURE)).unwrap_or(now)
}

/// Runs a single operation, mapping a missed deadline to
/// [`QueryError::Timeout`].
pub async fn invoke(
    transport: &dyn Transport,
    operation: &str,
    variables: &Value,
    timeout: Duration,
) -> QueryResult<Value> {
    let deadline = deadline_after(timeout);
    let call = transport.run(operation, variables, deadline);
    match tokio::time::timeout_at(deadline, call).await {
        Ok(result) => result.map_err(QueryError::from),
        Err(_) => Err(timeout_error(operation, timeout)),
    }
}

pub(crate) fn timeout_error(operation: &str, timeout: Duration) -> QueryError {
    QueryError::Timeout {
        operation: operation.to_string(),
        duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
    }
}

/// Runs a grouped call under one deadline.
///
/// A missed deadline or an outer transport failure is reported once per
/// call so each caller sees the same error. A response with the wrong
/// number of results fails the whole group.
pub async fn invoke_batch(
    transport: &dyn Transport,
    calls: &[OperationCall],
    timeout: Duration,
) -> Vec<QueryResult<Value>> {
    let deadline = deadline_after(timeout);
    let grouped = transport.run_batch(calls, deadline);
    let outcome = tokio::time::timeout_at(deadline, grouped).await;

    let results = match outcome {
        Ok(Ok(results)) if results.len() == calls.len() => results,
        Ok(Ok(results)) => {
            let err = TransportError::fatal(format!(
                "grouped call returned {} results for {} operations",
                results.len(),
                calls.len()
            ));
            return calls.iter().map(|_| Err(err.clone().into())).collect();
        }
        Ok(Err(err)) => return calls.iter().map(|_| Err(err.clone().into())).collect(),
        Err(_) => {
            return calls
                .iter()
                .map(|call| Err(timeout_error(&call.operation, timeout)))
                .collect();
        }
    };

    results
        .into_iter()
        .map(|result| result.map_err(QueryError::from))
        .collect()
}
