//! Singleflight for concurrent identical reads.
//!
//! The first caller for a key becomes the owner and starts the producer on
//! its own task; everyone arriving while it runs subscribes to the same
//! broadcast channel. Because the producer is spawned, an owner that is
//! dropped mid-wait does not cancel the execution the others depend on.

use std::future::Future;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use querygate_domain::{CacheKey, MetricsRecorder, Payload, QueryError, QueryResult};
use tokio::sync::broadcast;
use tracing::{debug, trace};

type Outcome = QueryResult<Payload>;
type InFlight = DashMap<CacheKey, broadcast::Sender<Outcome>>;

/// Result of trying to acquire a slot for a key.
enum Slot {
    /// We registered the key and must start the producer.
    Owner(broadcast::Receiver<Outcome>, broadcast::Sender<Outcome>),
    /// Another execution is running; wait for its result.
    Waiter(broadcast::Receiver<Outcome>),
}

/// Collapses concurrent executions for the same [`CacheKey`] into one.
pub struct Deduplicator {
    in_flight: Arc<InFlight>,
    metrics: Arc<MetricsRecorder>,
}

impl Deduplicator {
    pub fn new(metrics: Arc<MetricsRecorder>) -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
            metrics,
        }
    }

    /// Number of keys with an execution in progress.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Joins the in-flight execution for `key`, or starts `producer` if
    /// there is none.
    ///
    /// Every caller joined to one execution receives the same result,
    /// success or failure. The entry is removed before the result is
    /// delivered, so a caller arriving afterwards starts a fresh execution.
    pub async fn join_or_start<F, Fut>(&self, key: CacheKey, producer: F) -> QueryResult<Payload>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = QueryResult<Payload>> + Send + 'static,
    {
        let mut producer = Some(producer);

        loop {
            let mut rx = match self.acquire(&key) {
                Slot::Waiter(rx) => {
                    self.metrics.record_deduplicated();
                    trace!(%key, "joined in-flight execution");
                    rx
                }
                Slot::Owner(rx, tx) => {
                    let Some(producer) = producer.take() else {
                        // Only reachable if an earlier execution we owned died
                        // without a result and we won the slot again.
                        self.release(&key);
                        return Err(QueryError::internal(format!(
                            "execution for {key} ended without a result"
                        )));
                    };
                    self.spawn_owner(key.clone(), tx, producer);
                    rx
                }
            };

            match rx.recv().await {
                Ok(result) => return result,
                Err(_) => {
                    // The owner task went away without sending (panic).
                    // Its guard already cleared the slot; try again.
                    debug!(%key, "in-flight execution vanished, retrying");
                }
            }
        }
    }

    fn acquire(&self, key: &CacheKey) -> Slot {
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => Slot::Waiter(entry.get().subscribe()),
            Entry::Vacant(entry) => {
                let (tx, rx) = broadcast::channel(1);
                entry.insert(tx.clone());
                Slot::Owner(rx, tx)
            }
        }
    }

    fn release(&self, key: &CacheKey) {
        self.in_flight.remove(key);
    }

    fn spawn_owner<F, Fut>(
        &self,
        key: CacheKey,
        tx: broadcast::Sender<Outcome>,
        producer: F,
    ) where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = QueryResult<Payload>> + Send + 'static,
    {
        let guard = SingleflightGuard::new(Arc::clone(&self.in_flight), key);
        tokio::spawn(async move {
            let result = producer().await;
            guard.complete();
            // No receivers left is fine: every waiter was cancelled.
            let _ = tx.send(result);
        });
    }
}

impl std::fmt::Debug for Deduplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deduplicator")
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

/// RAII guard that clears the in-flight slot on drop.
///
/// Runs on the normal path via [`SingleflightGuard::complete`] and on
/// unwinding if the producer panics.
struct SingleflightGuard {
    in_flight: Arc<InFlight>,
    key: CacheKey,
    completed: bool,
}

impl SingleflightGuard {
    fn new(in_flight: Arc<InFlight>, key: CacheKey) -> Self {
        Self {
            in_flight,
            key,
            completed: false,
        }
    }

    fn complete(mut self) {
        self.in_flight.remove(&self.key);
        self.completed = true;
    }
}

impl Drop for SingleflightGuard {
    fn drop(&mut self) {
        if !self.completed {
            self.in_flight.remove(&self.key);
        }
    }
}
