//! querygate-server: Request coalescing and the query gate facade
//!
//! This crate wires the domain pieces into a runnable gate:
//! - Configuration management
//! - In-flight deduplication (singleflight)
//! - Time-window batching
//! - The `QueryGate` entry point and cache preloading
//! - Logging and Prometheus setup
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              querygate-server               │
//! ├─────────────────────────────────────────────┤
//! │  config.rs       - Configuration            │
//! │  handlers/                                  │
//! │    gate.rs         - execute + management   │
//! │    singleflight.rs - Deduplication          │
//! │    batch/          - Window batching        │
//! │    preload.rs      - Cache warming          │
//! │  observability/  - Logging & metrics        │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use querygate_server::{GateConfig, QueryGate};
//! use querygate_domain::{QueryRequest, VolatilityClass};
//!
//! let gate = QueryGate::new(GateConfig::from_env()?, transport)?;
//! let accounts = gate
//!     .execute(QueryRequest::read("GetAccounts", json!({}), VolatilityClass::Long))
//!     .await?;
//! ```

pub mod config;
pub mod handlers;
pub mod observability;

// Re-exports for convenience
pub use config::{ConfigLoadError, GateConfig};
pub use handlers::{PreloadReport, QueryGate};
