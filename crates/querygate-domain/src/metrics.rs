//! Process-wide counters for cache and coalescing effectiveness.
//!
//! Counters live in atomics so the store, deduplicator and batch scheduler
//! can bump them without sharing a lock. Each increment is also mirrored to
//! the `metrics` facade so an installed exporter sees the same numbers.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Read-only copy of the recorder state at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size_in_bytes: u64,
    pub entry_count: u64,
    pub deduplicated_calls: u64,
    pub batched_calls: u64,
    pub transport_calls: u64,
}

impl MetricsSnapshot {
    /// Fraction of lookups that were hits, 0.0 when nothing was looked up.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// Passive counters incremented by the other components.
#[derive(Debug)]
pub struct MetricsRecorder {
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    deduplicated_calls: AtomicU64,
    batched_calls: AtomicU64,
    transport_calls: AtomicU64,
    // Gauges mirror live store state and are kept even when disabled.
    size_in_bytes: AtomicU64,
    entry_count: AtomicU64,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new(true)
    }
}

impl MetricsRecorder {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            deduplicated_calls: AtomicU64::new(0),
            batched_calls: AtomicU64::new(0),
            transport_calls: AtomicU64::new(0),
            size_in_bytes: AtomicU64::new(0),
            entry_count: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn record_hit(&self) {
        if self.enabled {
            self.hits.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("querygate_cache_hits_total").increment(1);
        }
    }

    pub fn record_miss(&self) {
        if self.enabled {
            self.misses.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("querygate_cache_misses_total")
                .increment(1);
        }
    }

    pub fn record_evictions(&self, count: u64) {
        if self.enabled && count > 0 {
            self.evictions.fetch_add(count, Ordering::Relaxed);
            metrics::counter!("querygate_cache_evictions_total")
                .increment(count);
        }
    }

    pub fn record_deduplicated(&self) {
        if self.enabled {
            self.deduplicated_calls.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("querygate_deduplicated_calls_total")
                .increment(1);
        }
    }

    pub fn record_batched(&self, count: u64) {
        if self.enabled && count > 0 {
            self.batched_calls.fetch_add(count, Ordering::Relaxed);
            metrics::counter!("querygate_batched_calls_total")
                .increment(count);
        }
    }

    pub fn record_transport_call(&self) {
        if self.enabled {
            self.transport_calls.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("querygate_transport_calls_total")
                .increment(1);
        }
    }

    /// Publishes the store's current size and entry count.
    pub fn set_store_size(&self, size_in_bytes: u64, entry_count: u64) {
        self.size_in_bytes.store(size_in_bytes, Ordering::Relaxed);
        self.entry_count.store(entry_count, Ordering::Relaxed);
        if self.enabled {
            metrics::gauge!("querygate_cache_size_bytes")
                .set(size_in_bytes as f64);
            metrics::gauge!("querygate_cache_entries")
                .set(entry_count as f64);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size_in_bytes: self.size_in_bytes.load(Ordering::Relaxed),
            entry_count: self.entry_count.load(Ordering::Relaxed),
            deduplicated_calls: self.deduplicated_calls.load(Ordering::Relaxed),
            batched_calls: self.batched_calls.load(Ordering::Relaxed),
            transport_calls: self.transport_calls.load(Ordering::Relaxed),
        }
    }

    /// Zeroes every counter. Size gauges describe live store contents and
    /// are left alone.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.deduplicated_calls.store(0, Ordering::Relaxed);
        self.batched_calls.store(0, Ordering::Relaxed);
        self.transport_calls.store(0, Ordering::Relaxed);
    }
}

/// Registers metric descriptions with the installed recorder.
///
/// Optional; call once at startup for nicer exporter output.
pub fn register_metrics() {
    metrics::describe_counter!("querygate_cache_hits_total", "Total number of cache hits");
    metrics::describe_counter!(
        "querygate_cache_misses_total",
        "Total number of cache misses"
    );
    metrics::describe_counter!(
        "querygate_cache_evictions_total",
        "Total number of entries evicted to respect the size ceiling"
    );
    metrics::describe_counter!(
        "querygate_deduplicated_calls_total",
        "Total number of reads that joined an in-flight execution"
    );
    metrics::describe_counter!(
        "querygate_batched_calls_total",
        "Total number of operations submitted as part of a multi-operation flush"
    );
    metrics::describe_counter!(
        "querygate_transport_calls_total",
        "Total number of transport invocations"
    );
    metrics::describe_gauge!(
        "querygate_cache_size_bytes",
        "Approximate bytes held by the cache"
    );
    metrics::describe_gauge!(
        "querygate_cache_entries",
        "Number of entries held by the cache"
    );
}
