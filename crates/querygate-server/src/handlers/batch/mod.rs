//! Time-window batching of reads.
//!
//! The first read enqueued after an idle period opens a window. Reads for
//! other keys arriving before it closes join the same batch. The batch
//! flushes when the window elapses or when it reaches `max_batch_size`,
//! whichever comes first; reads still queued at that point open the next
//! window straight away.
//!
//! # Deadlines
//!
//! The window only bounds how long a read waits before its flush starts.
//! The flush itself is bounded by the transport deadline. In a grouped
//! call the smallest per-read deadline applies to the whole group.

mod scheduler;
mod types;

pub use scheduler::BatchScheduler;
pub use types::{BatchConfig, DEFAULT_BATCH_WINDOW, DEFAULT_MAX_BATCH_SIZE, DEFAULT_TRANSPORT_TIMEOUT};
