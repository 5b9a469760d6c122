//! Integration tests for the query gate.
//!
//! # Test Categories
//!
//! 1. Cache path - hits, TTL expiry, force refresh, cache disabled
//! 2. Deduplication - concurrent identical reads, failures, timeouts, cancellation
//! 3. Batching - grouped and individual flushes, deadlines
//! 4. Mutations - invalidation by explicit patterns and configured rules
//! 5. Management - invalidate, clear, metrics, capacity, preload

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use querygate_domain::{InvalidationPattern, QueryError, QueryRequest, TtlPolicy};
use querygate_server::config::{InvalidationRule, TtlOverride};
use serde_json::json;

use common::{call_number, create_gate, read, test_config, CountingTransport, LARGE_PREFIX};

// ============================================================
// Section 1: Cache path
// ============================================================

#[tokio::test(start_paused = true)]
async fn test_second_read_is_served_from_cache() {
    // Arrange
    let transport = Arc::new(CountingTransport::new());
    let gate = create_gate(test_config(), Arc::clone(&transport));

    // Act
    let first = gate.execute(read("GetAccounts", 1)).await.unwrap();
    let second = gate.execute(read("GetAccounts", 1)).await.unwrap();

    // Assert
    assert_eq!(first, second);
    assert_eq!(transport.total_calls(), 1);
    let snapshot = gate.metrics_snapshot();
    assert_eq!(snapshot.hits, 1);
    assert_eq!(snapshot.misses, 1);
    assert_eq!(snapshot.transport_calls, 1);
    assert_eq!(snapshot.entry_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_variable_order_does_not_affect_cache_key() {
    let transport = Arc::new(CountingTransport::new());
    let gate = create_gate(test_config(), Arc::clone(&transport));

    let a = QueryRequest::read(
        "GetTransactions",
        json!({"limit": 10, "filters": {"start": "2024-01-01", "end": "2024-01-31"}}),
        querygate_domain::VolatilityClass::Short,
    );
    let b = QueryRequest::read(
        "GetTransactions",
        json!({"filters": {"end": "2024-01-31", "start": "2024-01-01"}, "limit": 10}),
        querygate_domain::VolatilityClass::Short,
    );

    gate.execute(a).await.unwrap();
    gate.execute(b).await.unwrap();

    assert_eq!(transport.total_calls(), 1);
    assert_eq!(gate.metrics_snapshot().hits, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cache_disabled_calls_transport_every_time() {
    let transport = Arc::new(CountingTransport::new());
    let mut config = test_config();
    config.cache.enabled = false;
    let gate = create_gate(config, Arc::clone(&transport));

    for _ in 0..3 {
        gate.execute(read("GetAccounts", 1)).await.unwrap();
    }

    assert_eq!(transport.single_calls(), 3);
    let snapshot = gate.metrics_snapshot();
    assert_eq!(snapshot.hits, 0);
    assert_eq!(snapshot.transport_calls, 3);
    assert_eq!(snapshot.entry_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_expired_entry_triggers_fresh_fetch() {
    let transport = Arc::new(CountingTransport::new());
    let mut config = test_config();
    config.cache.ttl_overrides.push(TtlOverride {
        operation: "GetAccounts".to_string(),
        ttl: TtlPolicy::from_secs(5),
    });
    let gate = create_gate(config, Arc::clone(&transport));

    // t=0: miss, fetch
    let first = gate.execute(read("GetAccounts", 1)).await.unwrap();
    // still fresh: hit
    let cached = gate.execute(read("GetAccounts", 1)).await.unwrap();
    assert_eq!(call_number(&first), call_number(&cached));

    // t=6s: miss, fresh fetch
    tokio::time::advance(Duration::from_secs(6)).await;
    let refreshed = gate.execute(read("GetAccounts", 1)).await.unwrap();

    assert_ne!(call_number(&first), call_number(&refreshed));
    assert_eq!(transport.total_calls(), 2);
    let snapshot = gate.metrics_snapshot();
    assert_eq!(snapshot.hits, 1);
    assert_eq!(snapshot.misses, 2);
}

#[tokio::test(start_paused = true)]
async fn test_zero_ttl_override_never_caches() {
    let transport = Arc::new(CountingTransport::new());
    let mut config = test_config();
    config.cache.ttl_overrides.push(TtlOverride {
        operation: "GetAccounts".to_string(),
        ttl: TtlPolicy::from_secs(0),
    });
    let gate = create_gate(config, Arc::clone(&transport));

    gate.execute(read("GetAccounts", 1)).await.unwrap();
    gate.execute(read("GetAccounts", 1)).await.unwrap();

    assert_eq!(transport.total_calls(), 2);
    assert!(gate.store().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_force_refresh_skips_lookup_and_repopulates() {
    let transport = Arc::new(CountingTransport::new());
    let gate = create_gate(test_config(), Arc::clone(&transport));

    let first = gate.execute(read("GetAccounts", 1)).await.unwrap();
    let forced = gate
        .execute(read("GetAccounts", 1).with_force_refresh(true))
        .await
        .unwrap();
    let after = gate.execute(read("GetAccounts", 1)).await.unwrap();

    assert_ne!(call_number(&first), call_number(&forced));
    assert_eq!(call_number(&forced), call_number(&after));
    assert_eq!(transport.total_calls(), 2);
    let snapshot = gate.metrics_snapshot();
    assert_eq!(snapshot.misses, 1, "forced read records no lookup");
    assert_eq!(snapshot.hits, 1);
}

#[tokio::test]
async fn test_non_object_variables_are_invalid_input() {
    let transport = Arc::new(CountingTransport::new());
    let gate = create_gate(test_config(), Arc::clone(&transport));

    let request = QueryRequest::read(
        "GetAccounts",
        json!([1, 2, 3]),
        querygate_domain::VolatilityClass::Short,
    );
    let err = gate.execute(request).await.unwrap_err();

    assert!(matches!(err, QueryError::InvalidInput { .. }));
    assert_eq!(transport.total_calls(), 0);
}

// ============================================================
// Section 2: Deduplication
// ============================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_identical_reads_share_one_transport_call() {
    // Arrange
    let delay = Duration::from_millis(50);
    let transport = Arc::new(CountingTransport::new().with_delay(delay));
    let gate = create_gate(test_config(), Arc::clone(&transport));

    // Act
    let reads = (0..10).map(|_| gate.execute(read("GetAccounts", 1)));
    let results = join_all(reads).await;

    // Assert
    assert_eq!(transport.total_calls(), 1);
    let first = results[0].as_ref().unwrap();
    assert!(results.iter().all(|r| r.as_ref().unwrap() == first));
    assert_eq!(gate.metrics_snapshot().deduplicated_calls, 9);
}

#[tokio::test(start_paused = true)]
async fn test_failure_reaches_all_waiters_and_is_not_cached() {
    let delay = Duration::from_millis(20);
    let transport = Arc::new(CountingTransport::new().with_delay(delay));
    transport.fail_next("GetAccounts", 1);
    let gate = create_gate(test_config(), Arc::clone(&transport));

    let reads = (0..3).map(|_| gate.execute(read("GetAccounts", 1)));
    let results = join_all(reads).await;

    for result in &results {
        assert!(matches!(result, Err(QueryError::Transport(e)) if e.is_retryable()));
    }
    assert!(gate.store().is_empty());

    // A later call starts a fresh execution
    let value = gate.execute(read("GetAccounts", 1)).await.unwrap();
    assert_eq!(value["operation"], "GetAccounts");
    assert_eq!(transport.total_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_clears_pending_request() {
    let transport = Arc::new(CountingTransport::new().with_delay(Duration::from_secs(2)));
    let gate = create_gate(test_config(), Arc::clone(&transport));

    let timeout = Duration::from_millis(100);
    let strict = || read("GetAccounts", 1).with_timeout(timeout);
    let results = join_all((0..3).map(|_| gate.execute(strict()))).await;

    for result in &results {
        assert_eq!(
            result.as_ref().unwrap_err(),
            &QueryError::Timeout {
                operation: "GetAccounts".to_string(),
                duration_ms: 100
            }
        );
    }
    assert_eq!(transport.total_calls(), 1);

    let value = gate
        .execute(read("GetAccounts", 1).with_timeout(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(value["operation"], "GetAccounts");
    assert_eq!(transport.total_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_waiter_does_not_affect_others() {
    let delay = Duration::from_millis(100);
    let transport = Arc::new(CountingTransport::new().with_delay(delay));
    let gate = Arc::new(create_gate(test_config(), Arc::clone(&transport)));

    let first = {
        let gate = Arc::clone(&gate);
        tokio::spawn(async move { gate.execute(read("GetAccounts", 1)).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = {
        let gate = Arc::clone(&gate);
        tokio::spawn(async move { gate.execute(read("GetAccounts", 1)).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    first.abort();

    let value = second.await.unwrap().unwrap();
    assert_eq!(value["operation"], "GetAccounts");
    assert_eq!(transport.total_calls(), 1);
    // The owner's execution still filled the cache
    assert_eq!(gate.store().len(), 1);
}

// ============================================================
// Section 3: Batching
// ============================================================

#[tokio::test(start_paused = true)]
async fn test_distinct_reads_flush_as_one_grouped_call() {
    let transport = Arc::new(CountingTransport::new().grouped());
    let gate = create_gate(test_config(), Arc::clone(&transport));

    let reads = (1..=4).map(|id| gate.execute(read("GetAccount", id)));
    let results = join_all(reads).await;

    assert_eq!(transport.grouped_calls(), 1);
    assert_eq!(transport.single_calls(), 0);
    for (id, result) in (1..=4).zip(&results) {
        assert_eq!(result.as_ref().unwrap()["variables"]["id"], id);
    }
    let snapshot = gate.metrics_snapshot();
    assert_eq!(snapshot.batched_calls, 4);
    assert_eq!(snapshot.transport_calls, 1);
}

#[tokio::test(start_paused = true)]
async fn test_without_grouping_reads_flush_as_parallel_calls() {
    let delay = Duration::from_millis(100);
    let transport = Arc::new(CountingTransport::new().with_delay(delay));
    let gate = create_gate(test_config(), Arc::clone(&transport));
    let start = tokio::time::Instant::now();

    let reads = (1..=4).map(|id| gate.execute(read("GetAccount", id)));
    let results = join_all(reads).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(transport.single_calls(), 4);
    assert!(start.elapsed() < Duration::from_millis(200));
    let snapshot = gate.metrics_snapshot();
    assert_eq!(snapshot.batched_calls, 4);
    assert_eq!(snapshot.transport_calls, 4);
}

#[tokio::test(start_paused = true)]
async fn test_batching_disabled_calls_transport_directly() {
    let transport = Arc::new(CountingTransport::new().grouped());
    let mut config = test_config();
    config.batching.enabled = false;
    let gate = create_gate(config, Arc::clone(&transport));

    let reads = (1..=3).map(|id| gate.execute(read("GetAccount", id)));
    join_all(reads).await;

    assert_eq!(transport.grouped_calls(), 0);
    assert_eq!(transport.single_calls(), 3);
    assert_eq!(gate.metrics_snapshot().batched_calls, 0);
}

#[tokio::test(start_paused = true)]
async fn test_flush_outliving_window_times_out() {
    let transport = Arc::new(CountingTransport::new().with_delay(Duration::from_secs(60)));
    let mut config = test_config();
    config.transport.timeout_ms = 1000;
    let gate = create_gate(config, Arc::clone(&transport));

    let err = gate.execute(read("GetAccounts", 1)).await.unwrap_err();

    assert!(matches!(err, QueryError::Timeout { duration_ms: 1000, .. }));
    assert!(gate.store().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_request_timeout_reaches_transport() {
    let transport = Arc::new(CountingTransport::new());
    let gate = create_gate(test_config(), Arc::clone(&transport));

    let value = gate
        .execute(read("GetAccounts", 1).with_timeout(Duration::MAX))
        .await
        .unwrap();
    let update = QueryRequest::mutation("UpdateAccount", json!({}));
    let mutation = gate
        .execute(update.with_timeout(Duration::MAX))
        .await
        .unwrap();

    assert_eq!(value["operation"], "GetAccounts");
    assert_eq!(mutation["operation"], "UpdateAccount");
    assert_eq!(transport.single_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_timeout_in_grouped_flush() {
    let transport = Arc::new(CountingTransport::new().grouped());
    let gate = create_gate(test_config(), Arc::clone(&transport));

    let (a, b) = tokio::join!(
        gate.execute(read("GetAccounts", 1).with_timeout(Duration::MAX)),
        gate.execute(read("GetBudgets", 1).with_timeout(Duration::MAX)),
    );

    assert_eq!(a.unwrap()["operation"], "GetAccounts");
    assert_eq!(b.unwrap()["operation"], "GetBudgets");
    assert_eq!(transport.grouped_calls(), 1);
}

// ============================================================
// Section 4: Mutations
// ============================================================

#[tokio::test(start_paused = true)]
async fn test_mutation_invalidates_matching_reads() {
    let transport = Arc::new(CountingTransport::new());
    let gate = create_gate(test_config(), Arc::clone(&transport));
    let accounts = gate.execute(read("GetAccounts", 1)).await.unwrap();
    let budgets = gate.execute(read("GetBudgets", 1)).await.unwrap();

    gate.execute(
        QueryRequest::mutation("UpdateAccount", json!({"id": 1}))
            .invalidates(InvalidationPattern::prefix("GetAccount")),
    )
    .await
    .unwrap();

    let accounts_after = gate.execute(read("GetAccounts", 1)).await.unwrap();
    let budgets_after = gate.execute(read("GetBudgets", 1)).await.unwrap();

    assert_ne!(call_number(&accounts), call_number(&accounts_after));
    assert_eq!(call_number(&budgets), call_number(&budgets_after));
}

#[tokio::test(start_paused = true)]
async fn test_configured_rules_apply_to_mutations() {
    let transport = Arc::new(CountingTransport::new());
    let mut config = test_config();
    config.invalidation.rules.push(InvalidationRule {
        mutation: "UpdateBudget".to_string(),
        patterns: vec![InvalidationPattern::exact("GetBudgets")],
    });
    let gate = create_gate(config, Arc::clone(&transport));
    gate.execute(read("GetBudgets", 1)).await.unwrap();
    gate.execute(read("GetBudgets", 2)).await.unwrap();

    gate.execute(QueryRequest::mutation("UpdateBudget", json!({})))
        .await
        .unwrap();

    assert!(gate.store().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_mutation_keeps_cache() {
    let transport = Arc::new(CountingTransport::new());
    transport.fail_next("UpdateAccount", 1);
    let gate = create_gate(test_config(), Arc::clone(&transport));
    gate.execute(read("GetAccounts", 1)).await.unwrap();

    let result = gate
        .execute(
            QueryRequest::mutation("UpdateAccount", json!({}))
                .invalidates(InvalidationPattern::exact("GetAccounts")),
        )
        .await;

    assert!(result.is_err());
    assert_eq!(gate.store().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_mutations_are_never_cached_or_coalesced() {
    let transport = Arc::new(CountingTransport::new().grouped());
    let gate = create_gate(test_config(), Arc::clone(&transport));

    let update = || QueryRequest::mutation("UpdateAccount", json!({}));
    join_all((0..2).map(|_| gate.execute(update()))).await;

    assert_eq!(transport.single_calls(), 2);
    assert!(gate.store().is_empty());
    assert_eq!(gate.metrics_snapshot().deduplicated_calls, 0);
}

// ============================================================
// Section 5: Management
// ============================================================

#[tokio::test(start_paused = true)]
async fn test_invalidate_and_clear() {
    let transport = Arc::new(CountingTransport::new());
    let gate = create_gate(test_config(), Arc::clone(&transport));
    for id in 1..=3 {
        gate.execute(read("GetAccounts", id)).await.unwrap();
    }
    gate.execute(read("GetBudgets", 1)).await.unwrap();

    let accounts = InvalidationPattern::exact("GetAccounts");
    assert_eq!(gate.invalidate(&accounts), 3);
    assert_eq!(gate.store().len(), 1);

    gate.clear_cache();
    assert!(gate.store().is_empty());
    assert_eq!(gate.metrics_snapshot().entry_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_reset_metrics_and_disabled_metrics() {
    let transport = Arc::new(CountingTransport::new());
    let gate = create_gate(test_config(), Arc::clone(&transport));
    gate.execute(read("GetAccounts", 1)).await.unwrap();
    gate.execute(read("GetAccounts", 1)).await.unwrap();
    let hit_rate = gate.metrics_snapshot().hit_rate();
    assert!((hit_rate - 0.5).abs() < f64::EPSILON);

    gate.reset_metrics();
    let snapshot = gate.metrics_snapshot();
    let activity = snapshot.hits + snapshot.misses + snapshot.transport_calls;
    assert_eq!(activity, 0);
    assert_eq!(snapshot.entry_count, 1);

    let mut config = test_config();
    config.metrics.enabled = false;
    let quiet = create_gate(config, Arc::new(CountingTransport::new()));
    quiet.execute(read("GetAccounts", 1)).await.unwrap();
    quiet.execute(read("GetAccounts", 1)).await.unwrap();
    let snapshot = quiet.metrics_snapshot();
    let activity = snapshot.hits + snapshot.misses + snapshot.transport_calls;
    assert_eq!(activity, 0);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_value_is_returned_but_not_cached() {
    let transport = Arc::new(CountingTransport::new());
    let mut config = test_config();
    config.cache.max_size_bytes = 1024;
    let gate = create_gate(config, Arc::clone(&transport));
    let operation = format!("{LARGE_PREFIX}Report");

    let first = gate.execute(read(&operation, 1)).await.unwrap();
    let second = gate.execute(read(&operation, 1)).await.unwrap();

    assert!(first["blob"].as_str().unwrap().len() > 1024);
    assert_ne!(call_number(&first), call_number(&second));
    assert!(gate.store().is_empty());
    assert!(gate.store().size_bytes() <= 1024);
}

#[tokio::test(start_paused = true)]
async fn test_preload_warms_cache_and_reports_failures() {
    let transport = Arc::new(CountingTransport::new());
    transport.fail_next("GetBudgets", 1);
    let gate = create_gate(test_config(), Arc::clone(&transport));

    let report = gate
        .preload(vec![
            read("GetAccounts", 1),
            read("GetBudgets", 1),
            QueryRequest::mutation("UpdateAccount", json!({})),
        ])
        .await;

    assert_eq!(report.succeeded("GetAccounts"), Some(true));
    assert_eq!(report.succeeded("GetBudgets"), Some(false));
    assert_eq!(report.succeeded("UpdateAccount"), Some(false));
    assert_eq!(report.failure_count(), 2);

    let calls_before = transport.total_calls();
    gate.execute(read("GetAccounts", 1)).await.unwrap();
    // Preloaded read is a hit
    assert_eq!(transport.total_calls(), calls_before);
}
