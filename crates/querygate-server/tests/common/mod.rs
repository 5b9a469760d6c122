//! Shared test utilities for query gate integration tests.

// Allow dead_code because helpers are used across different test files,
// but each test file is compiled independently.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use querygate_domain::{OperationCall, QueryRequest, Transport, TransportError, VolatilityClass};
use querygate_server::{GateConfig, QueryGate};
use serde_json::{json, Value};
use tokio::time::Instant;

// =============================================================================
// Test Constants
// =============================================================================

/// Operations with this prefix return a payload of `LARGE_PAYLOAD_LEN` bytes.
pub const LARGE_PREFIX: &str = "Large";

pub const LARGE_PAYLOAD_LEN: usize = 4096;

// =============================================================================
// Counting transport
// =============================================================================

/// Transport double that echoes requests and counts invocations.
///
/// Every response carries a `call` number so tests can tell a cached value
/// from a fresh fetch.
pub struct CountingTransport {
    grouped: bool,
    delay: Duration,
    single_calls: AtomicUsize,
    grouped_calls: AtomicUsize,
    sequence: AtomicUsize,
    failures: Mutex<HashMap<String, usize>>,
}

impl CountingTransport {
    pub fn new() -> Self {
        Self {
            grouped: false,
            delay: Duration::ZERO,
            single_calls: AtomicUsize::new(0),
            grouped_calls: AtomicUsize::new(0),
            sequence: AtomicUsize::new(0),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Accept grouped calls.
    pub fn grouped(mut self) -> Self {
        self.grouped = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the next `times` executions of `operation` with a retryable error.
    pub fn fail_next(&self, operation: &str, times: usize) {
        self.failures
            .lock()
            .unwrap()
            .insert(operation.to_string(), times);
    }

    pub fn single_calls(&self) -> usize {
        self.single_calls.load(Ordering::SeqCst)
    }

    pub fn grouped_calls(&self) -> usize {
        self.grouped_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.single_calls() + self.grouped_calls()
    }

    fn respond(&self, operation: &str, variables: &Value) -> Result<Value, TransportError> {
        let call = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        let mut failures = self.failures.lock().unwrap();
        if let Some(remaining) = failures.get_mut(operation) {
            if *remaining > 0 {
                *remaining -= 1;
                let message = format!("{operation} unavailable");
                return Err(TransportError::retryable(message));
            }
        }
        drop(failures);

        if operation.starts_with(LARGE_PREFIX) {
            return Ok(json!({ "blob": "x".repeat(LARGE_PAYLOAD_LEN), "call": call }));
        }
        Ok(json!({ "operation": operation, "variables": variables, "call": call }))
    }
}

impl Default for CountingTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for CountingTransport {
    async fn run(
        &self,
        operation: &str,
        variables: &Value,
        _deadline: Instant,
    ) -> Result<Value, TransportError> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.respond(operation, variables)
    }

    fn supports_batch(&self) -> bool {
        self.grouped
    }

    async fn run_batch(
        &self,
        calls: &[OperationCall],
        _deadline: Instant,
    ) -> Result<Vec<Result<Value, TransportError>>, TransportError> {
        self.grouped_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(calls
            .iter()
            .map(|call| self.respond(&call.operation, &call.variables))
            .collect())
    }
}

// =============================================================================
// Gate helpers
// =============================================================================

/// Default configuration with a short batch window.
pub fn test_config() -> GateConfig {
    let mut config = GateConfig::default();
    config.batching.window_ms = 5;
    config
}

pub fn create_gate(config: GateConfig, transport: Arc<CountingTransport>) -> QueryGate {
    let transport: Arc<dyn Transport> = transport;
    QueryGate::new(config, transport).expect("valid config")
}

pub fn read(operation: &str, id: u32) -> QueryRequest {
    QueryRequest::read(operation, json!({ "id": id }), VolatilityClass::Short)
}

/// The `call` number stamped on a transport response.
pub fn call_number(value: &Value) -> u64 {
    value["call"].as_u64().expect("call number")
}
