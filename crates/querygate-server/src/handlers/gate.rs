//! The query gate: single entry point for reads and mutations.
//!
//! A read flows through four stages:
//!
//! 1. **Fingerprint**: operation name and canonical variables become a key
//! 2. **Cache**: a live entry is returned without touching the transport
//! 3. **Singleflight**: concurrent misses for one key share one execution
//! 4. **Batching**: executions for distinct keys are grouped per window
//!
//! Mutations skip all four. After the transport reports success, matching
//! cache entries are invalidated before the mutation result is returned.

use std::sync::Arc;
use std::time::Duration;

use querygate_domain::transport::invoke;
use querygate_domain::{
    fingerprint, CacheKey, CacheStore, InvalidationEngine, InvalidationPattern,
    InvalidationRules, MetricsRecorder, MetricsSnapshot, OperationCall, Payload, QueryRequest,
    QueryResult, Transport, TtlPolicy, TtlResolver,
};
use tracing::{debug, instrument, trace};

use crate::config::{ConfigLoadError, GateConfig};
use crate::handlers::batch::BatchScheduler;
use crate::handlers::singleflight::Deduplicator;

/// Caching and request-coalescing layer in front of a [`Transport`].
pub struct QueryGate {
    config: GateConfig,
    store: Arc<CacheStore>,
    invalidation: InvalidationEngine,
    rules: InvalidationRules,
    ttl: TtlResolver,
    dedup: Option<Deduplicator>,
    batcher: Option<Arc<BatchScheduler>>,
    transport: Arc<dyn Transport>,
    metrics: Arc<MetricsRecorder>,
}

impl std::fmt::Debug for QueryGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryGate")
            .field("config", &self.config)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl QueryGate {
    /// Builds a gate from a validated configuration.
    pub fn new(config: GateConfig, transport: Arc<dyn Transport>) -> Result<Self, ConfigLoadError> {
        config.validate()?;

        let metrics = Arc::new(MetricsRecorder::new(config.metrics.enabled));
        let store = Arc::new(CacheStore::new(
            config.cache_store_config(),
            Arc::clone(&metrics),
        ));
        let dedup = config
            .deduplication
            .enabled
            .then(|| Deduplicator::new(Arc::clone(&metrics)));
        let batcher = config.batching.enabled.then(|| {
            Arc::new(BatchScheduler::new(
                config.batch_config(),
                Arc::clone(&transport),
                Arc::clone(&metrics),
            ))
        });

        Ok(Self {
            invalidation: InvalidationEngine::new(Arc::clone(&store)),
            rules: config.invalidation_rules(),
            ttl: config.ttl_resolver(),
            store,
            dedup,
            batcher,
            transport,
            metrics,
            config,
        })
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Executes a read or a mutation.
    ///
    /// Reads may be served from the cache. Transport and timeout failures
    /// are returned to every caller waiting on the same key and are never
    /// cached. A result too large to cache is still returned.
    #[instrument(skip_all, fields(operation = %request.operation, kind = ?request.kind))]
    pub async fn execute(&self, request: QueryRequest) -> QueryResult<Payload> {
        if request.is_mutation() {
            return self.execute_mutation(request).await;
        }

        if !self.config.cache.enabled {
            return self.call_transport(&request).await;
        }

        let key = fingerprint(&request.operation, &request.variables)?;

        if request.force_refresh {
            debug!(%key, "forced refresh, skipping cache lookup");
        } else if let Some(hit) = self.store.get(&key) {
            trace!(%key, "cache hit");
            return Ok(hit);
        }

        let fetch = self.fetch_for(key.clone(), request);
        match &self.dedup {
            Some(dedup) => dedup.join_or_start(key, move || fetch.run()).await,
            None => fetch.run().await,
        }
    }

    async fn execute_mutation(&self, request: QueryRequest) -> QueryResult<Payload> {
        let result = self.call_transport(&request).await?;

        let mut patterns = request.invalidates;
        patterns.extend_from_slice(self.rules.patterns_for(&request.operation));
        let removed = self.invalidation.invalidate_all(&patterns);
        debug!(
            patterns = patterns.len(),
            removed, "mutation succeeded, invalidated cached reads"
        );

        Ok(result)
    }

    async fn call_transport(&self, request: &QueryRequest) -> QueryResult<Payload> {
        self.metrics.record_transport_call();
        invoke(
            self.transport.as_ref(),
            &request.operation,
            &request.variables,
            self.timeout_for(request),
        )
        .await
        .map(Arc::new)
    }

    fn timeout_for(&self, request: &QueryRequest) -> Duration {
        request
            .timeout
            .unwrap_or_else(|| self.config.transport_timeout())
    }

    fn fetch_for(&self, key: CacheKey, request: QueryRequest) -> Fetch {
        Fetch {
            ttl: self.ttl.resolve(&request.operation, request.volatility),
            timeout: request.timeout,
            default_timeout: self.config.transport_timeout(),
            call: OperationCall::new(request.operation, request.variables),
            key,
            store: Arc::clone(&self.store),
            batcher: self.batcher.clone(),
            transport: Arc::clone(&self.transport),
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// Removes cached entries matching `pattern`. Returns how many went.
    pub fn invalidate(&self, pattern: &InvalidationPattern) -> usize {
        self.invalidation.invalidate(pattern)
    }

    /// Empties the cache. Counters are kept.
    pub fn clear_cache(&self) {
        self.store.clear();
    }

    /// Eagerly drops expired entries.
    pub fn purge_expired(&self) -> usize {
        self.store.purge_expired()
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }
}

/// One cache-filling execution, owned so it can run on the singleflight task.
struct Fetch {
    key: CacheKey,
    call: OperationCall,
    timeout: Option<Duration>,
    default_timeout: Duration,
    ttl: TtlPolicy,
    store: Arc<CacheStore>,
    batcher: Option<Arc<BatchScheduler>>,
    transport: Arc<dyn Transport>,
    metrics: Arc<MetricsRecorder>,
}

impl Fetch {
    async fn run(self) -> QueryResult<Payload> {
        let result = match &self.batcher {
            Some(batcher) => {
                batcher
                    .enqueue(self.key.clone(), self.call.clone(), self.timeout)
                    .await
            }
            None => {
                self.metrics.record_transport_call();
                invoke(
                    self.transport.as_ref(),
                    &self.call.operation,
                    &self.call.variables,
                    self.timeout.unwrap_or(self.default_timeout),
                )
                .await
                .map(Arc::new)
            }
        };

        if let Ok(value) = &result {
            // Capacity errors stay internal; the caller still gets the value.
            let key = self.key.clone();
            let stored = self.store.set(key, Arc::clone(value), self.ttl);
            if let Err(err) = stored {
                debug!(key = %self.key, %err, "result returned without caching");
            }
        }

        result
    }
}
