//! Data types for time-window batching.

use std::time::Duration;

use querygate_domain::{CacheKey, OperationCall, Payload, QueryResult};
use tokio::sync::oneshot;

/// Default window the first pending read waits for companions.
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_millis(10);

/// Default size at which a batch flushes without waiting for the window.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 10;

/// Default transport deadline for a flush.
pub const DEFAULT_TRANSPORT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the batch scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// How long a window stays open after its first enqueue.
    pub window: Duration,
    /// A window holding this many distinct keys flushes immediately.
    pub max_batch_size: usize,
    /// Transport deadline for calls that do not carry their own.
    pub timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_BATCH_WINDOW,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            timeout: DEFAULT_TRANSPORT_TIMEOUT,
        }
    }
}

impl BatchConfig {
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

pub(crate) type Responder = oneshot::Sender<QueryResult<Payload>>;

/// One distinct key waiting in the open window.
#[derive(Debug)]
pub(crate) struct PendingCall {
    pub key: CacheKey,
    pub call: OperationCall,
    pub timeout: Duration,
    /// Every caller that enqueued this key in the current window.
    pub responders: Vec<Responder>,
}

impl PendingCall {
    /// Forgets callers that stopped waiting. Returns false once none remain.
    pub fn retain_waiting(&mut self) -> bool {
        self.responders.retain(|responder| !responder.is_closed());
        !self.responders.is_empty()
    }

    /// Delivers `result` to every responder. Callers that went away are
    /// skipped.
    pub fn resolve(self, result: QueryResult<Payload>) {
        for responder in self.responders {
            let _ = responder.send(result.clone());
        }
    }
}
