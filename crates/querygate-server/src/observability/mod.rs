//! Observability infrastructure for the query gate.
//!
//! This module provides:
//! - Structured logging configuration
//! - Prometheus exposition of the gate's counters

mod logging;
mod metrics;

pub use logging::{create_json_layer, init_logging, LoggingConfig};
pub use metrics::{init_metrics, MetricsError, MetricsState};
