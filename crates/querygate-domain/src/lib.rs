//! querygate-domain: Core caching logic for the query gate
//!
//! This crate contains the pieces that do not depend on a runtime
//! scheduler:
//! - Request fingerprinting (stable cache keys)
//! - Size-bounded TTL/LRU result cache
//! - Pattern-based invalidation
//! - Effectiveness counters
//! - The transport contract
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               querygate-domain              │
//! ├─────────────────────────────────────────────┤
//! │  fingerprint   - Canonical cache keys       │
//! │  volatility    - TTL classes & overrides    │
//! │  operation     - Requests & detail levels   │
//! │  cache/        - TTL + LRU result store     │
//! │  invalidation  - Exact / prefix removal     │
//! │  metrics       - Hit/miss/coalescing stats  │
//! │  transport     - Remote execution contract  │
//! └─────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod error;
pub mod fingerprint;
pub mod invalidation;
pub mod metrics;
pub mod operation;
pub mod transport;
pub mod volatility;

// Re-export commonly used types at the crate root
pub use cache::{CacheStore, CacheStoreConfig, Payload};
pub use error::{QueryError, QueryResult, TransportError, TransportErrorKind};
pub use fingerprint::{fingerprint, CacheKey};
pub use invalidation::{InvalidationEngine, InvalidationPattern, InvalidationRules};
pub use metrics::{MetricsRecorder, MetricsSnapshot};
pub use operation::{DetailLevel, QueryKind, QueryRequest};
pub use transport::{OperationCall, Transport};
pub use volatility::{TtlPolicy, TtlResolver, VolatilityClass};
