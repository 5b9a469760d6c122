//! Prometheus metrics infrastructure.
//!
//! The gate's [`MetricsRecorder`](querygate_domain::MetricsRecorder) mirrors
//! every counter to the `metrics` facade. Installing the Prometheus recorder
//! here makes those series available in text exposition format.
//!
//! # Metrics Exposed
//!
//! - `querygate_cache_hits_total` - Cache hit count
//! - `querygate_cache_misses_total` - Cache miss count
//! - `querygate_cache_evictions_total` - Entries evicted for space
//! - `querygate_deduplicated_calls_total` - Reads that joined an in-flight call
//! - `querygate_batched_calls_total` - Operations sent in grouped flushes
//! - `querygate_transport_calls_total` - Transport invocations
//! - `querygate_cache_size_bytes` / `querygate_cache_entries` - Store gauges

use std::sync::Arc;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Shared state containing the Prometheus handle for metrics rendering.
#[derive(Clone)]
pub struct MetricsState {
    handle: Arc<PrometheusHandle>,
}

impl MetricsState {
    /// Creates a new metrics state with the given Prometheus handle.
    pub fn new(handle: PrometheusHandle) -> Self {
        Self {
            handle: Arc::new(handle),
        }
    }

    /// Renders the current metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Error type for metrics initialization.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to install Prometheus recorder: recorder already installed")]
    AlreadyInstalled,
}

/// Installs the Prometheus recorder and describes the gate's metrics.
///
/// Call once at startup, before the first gate is built.
///
/// # Errors
///
/// Returns an error if a recorder is already installed.
pub fn init_metrics() -> Result<MetricsState, MetricsError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|_| MetricsError::AlreadyInstalled)?;

    querygate_domain::metrics::register_metrics();

    Ok(MetricsState::new(handle))
}
