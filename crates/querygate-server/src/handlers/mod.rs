//! Request handling: the gate facade and the coalescing stages behind it.

pub mod batch;
pub mod gate;
pub mod preload;
pub mod singleflight;

pub use batch::{BatchConfig, BatchScheduler};
pub use gate::QueryGate;
pub use preload::PreloadReport;
pub use singleflight::Deduplicator;
