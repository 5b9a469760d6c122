//! Batch scheduler implementation.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::join_all;
use querygate_domain::transport::{invoke, invoke_batch};
use querygate_domain::{
    CacheKey, MetricsRecorder, OperationCall, Payload, QueryError, QueryResult, Transport,
};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use super::types::{BatchConfig, PendingCall};

#[derive(Debug, Default)]
struct WindowState {
    pending: Vec<PendingCall>,
    /// Bumped on every flush so a timer can tell its window already went.
    generation: u64,
    timer_armed: bool,
}

/// Groups reads for distinct keys arriving within a short window into one
/// flush.
///
/// A flush goes to the transport as one grouped call when it supports that,
/// otherwise as concurrent individual calls. Each caller receives the result
/// for its own key.
pub struct BatchScheduler {
    config: BatchConfig,
    transport: Arc<dyn Transport>,
    metrics: Arc<MetricsRecorder>,
    state: Mutex<WindowState>,
}

impl std::fmt::Debug for BatchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScheduler")
            .field("config", &self.config)
            .field("pending", &self.pending())
            .finish()
    }
}

impl BatchScheduler {
    pub fn new(
        config: BatchConfig,
        transport: Arc<dyn Transport>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            config,
            transport,
            metrics,
            state: Mutex::new(WindowState::default()),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Number of distinct keys waiting in the open window.
    pub fn pending(&self) -> usize {
        self.lock("pending").pending.len()
    }

    /// Adds a read to the open window and waits for its flush.
    ///
    /// `timeout` overrides the configured transport deadline for this call.
    /// Enqueuing a key that is already waiting in the window attaches this
    /// caller to it instead of adding a second operation.
    pub async fn enqueue(
        self: &Arc<Self>,
        key: CacheKey,
        call: OperationCall,
        timeout: Option<Duration>,
    ) -> QueryResult<Payload> {
        let (tx, rx) = oneshot::channel();
        let timeout = timeout.unwrap_or(self.config.timeout);

        let ready = {
            let mut state = self.lock("enqueue");
            match state.pending.iter_mut().find(|pending| pending.key == key) {
                Some(pending) => {
                    pending.responders.push(tx);
                    pending.timeout = pending.timeout.min(timeout);
                }
                None => {
                    trace!(%key, "added to batch window");
                    state.pending.push(PendingCall {
                        key,
                        call,
                        timeout,
                        responders: vec![tx],
                    });
                }
            }

            if state.pending.len() >= self.max_batch_size() {
                Some(self.take_batch(&mut state))
            } else {
                self.arm_timer(&mut state);
                None
            }
        };

        if let Some(batch) = ready {
            self.dispatch(batch);
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(QueryError::internal("batch flush dropped its result")),
        }
    }

    fn max_batch_size(&self) -> usize {
        self.config.max_batch_size.max(1)
    }

    /// Removes up to one batch from the window. Anything left over gets a
    /// fresh window.
    fn take_batch(self: &Arc<Self>, state: &mut WindowState) -> Vec<PendingCall> {
        Self::drop_abandoned(state);
        let take = state.pending.len().min(self.max_batch_size());
        let batch: Vec<PendingCall> = state.pending.drain(..take).collect();
        state.generation += 1;
        state.timer_armed = false;

        if !state.pending.is_empty() {
            self.arm_timer(state);
        }
        batch
    }

    fn arm_timer(self: &Arc<Self>, state: &mut WindowState) {
        if state.timer_armed {
            return;
        }
        state.timer_armed = true;

        let generation = state.generation;
        let window = self.config.window;
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            scheduler.flush_window(generation);
        });
    }

    fn flush_window(self: &Arc<Self>, generation: u64) {
        let batch = {
            let mut state = self.lock("flush_window");
            if state.generation != generation {
                // Flushed early by size; a newer timer owns the window.
                return;
            }
            Self::drop_abandoned(&mut state);
            if state.pending.is_empty() {
                state.timer_armed = false;
                return;
            }
            self.take_batch(&mut state)
        };
        self.dispatch(batch);
    }

    /// Removes keys whose callers all went away before the flush.
    fn drop_abandoned(state: &mut WindowState) {
        let before = state.pending.len();
        state.pending.retain_mut(PendingCall::retain_waiting);
        let dropped = before - state.pending.len();
        if dropped > 0 {
            debug!(dropped, "dropped batch entries with no waiting caller");
        }
    }

    /// Runs the flush on its own task so that a caller going away never
    /// cancels a transport call other callers wait on.
    fn dispatch(self: &Arc<Self>, batch: Vec<PendingCall>) {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            scheduler.execute(batch).await;
        });
    }

    async fn execute(&self, batch: Vec<PendingCall>) {
        let size = batch.len();
        if size >= 2 {
            self.metrics.record_batched(size as u64);
        }

        if size >= 2 && self.transport.supports_batch() {
            // The strictest caller deadline bounds the whole group.
            let timeout = batch
                .iter()
                .map(|pending| pending.timeout)
                .min()
                .unwrap_or(self.config.timeout);
            let calls: Vec<OperationCall> =
                batch.iter().map(|pending| pending.call.clone()).collect();

            let timeout_ms = timeout.as_millis() as u64;
            debug!(size, timeout_ms, "flushing grouped call");
            self.metrics.record_transport_call();
            let results = invoke_batch(self.transport.as_ref(), &calls, timeout).await;

            for (pending, result) in batch.into_iter().zip(results) {
                pending.resolve(result.map(Arc::new));
            }
        } else {
            debug!(size, "flushing individual calls");
            join_all(batch.into_iter().map(|pending| async move {
                self.metrics.record_transport_call();
                let result = invoke(
                    self.transport.as_ref(),
                    &pending.call.operation,
                    &pending.call.variables,
                    pending.timeout,
                )
                .await;
                pending.resolve(result.map(Arc::new));
            }))
            .await;
        }
    }

    fn lock(&self, op: &'static str) -> MutexGuard<'_, WindowState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(
                    op,
                    result = "poisoned_recovered",
                    "Recovered from poisoned batch lock"
                );
                poisoned.into_inner()
            }
        }
    }
}
