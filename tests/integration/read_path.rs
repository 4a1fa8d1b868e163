//! End-to-end read flows through the full component stack.

use serde_json::json;

use argus::config::LimiterConfig;
use argus::limiter::ClientType;
use argus::{ReadRequest, ReadSource, SharedStore};

use crate::{stack, CountingExecutor};

fn story_request() -> ReadRequest {
    let mut request = ReadRequest::new(
        "story:42",
        "SELECT * FROM stories WHERE id = 42",
        "user-7",
    );
    request.client_type = ClientType::Web;
    request.cache_ttl_secs = Some(300);
    request.cache_tags = vec!["story".to_string()];
    request
}

#[tokio::test]
async fn test_story_read_end_to_end() {
    let stack = stack(
        SharedStore::memory(),
        LimiterConfig::default(),
        CountingExecutor::new(json!({"id": 42, "title": "hello"}), 150.0),
    )
    .await;

    let first = stack.path.fetch(&story_request()).await.unwrap();
    assert_eq!(
        first.source,
        ReadSource::Database {
            instance: "replica-1".to_string()
        }
    );
    assert_eq!(first.value, json!({"id": 42, "title": "hello"}));
    assert_eq!(stack.executor.calls(), 1);

    // 150ms execution crossed the 100ms slow threshold.
    let optimizer_metrics = stack.optimizer.get_metrics();
    assert_eq!(optimizer_metrics.total_queries, 1);
    assert_eq!(optimizer_metrics.slow_queries, 1);

    // The write-back makes the next read a tier-1 hit with no database
    // access.
    let second = stack.path.fetch(&story_request()).await.unwrap();
    assert_eq!(second.source, ReadSource::Tier1);
    assert_eq!(second.value, json!({"id": 42, "title": "hello"}));
    assert_eq!(stack.executor.calls(), 1);

    let cache_stats = stack.cache.stats();
    assert_eq!(cache_stats.misses, 1);
    assert_eq!(cache_stats.hits, 1);

    stack.stop();
}

#[tokio::test]
async fn test_tier2_serves_a_second_process() {
    let store = SharedStore::memory();
    let writer = stack(
        store.clone(),
        LimiterConfig::default(),
        CountingExecutor::new(json!([1, 2, 3]), 20.0),
    )
    .await;
    let reader = stack(
        store,
        LimiterConfig::default(),
        CountingExecutor::new(json!("unused"), 20.0),
    )
    .await;

    let request = ReadRequest::new("feed:9", "SELECT * FROM feeds WHERE id = 9", "user-7");
    writer.path.fetch(&request).await.unwrap();

    // The second stack has an empty tier-1 but shares the store.
    let outcome = reader.path.fetch(&request).await.unwrap();
    assert_eq!(outcome.source, ReadSource::Tier2);
    assert_eq!(outcome.value, json!([1, 2, 3]));
    assert_eq!(reader.executor.calls(), 0);

    // And its tier-1 is now repopulated.
    let again = reader.path.fetch(&request).await.unwrap();
    assert_eq!(again.source, ReadSource::Tier1);

    writer.stop();
    reader.stop();
}

#[tokio::test]
async fn test_tag_invalidation_forces_a_fresh_read() {
    let stack = stack(
        SharedStore::memory(),
        LimiterConfig::default(),
        CountingExecutor::new(json!({"id": 42}), 20.0),
    )
    .await;
    let request = story_request();

    stack.path.fetch(&request).await.unwrap();
    assert_eq!(stack.executor.calls(), 1);

    let removed = stack.cache.invalidate_by_tags(&["story".to_string()]).await;
    assert_eq!(removed, 1);

    let outcome = stack.path.fetch(&request).await.unwrap();
    assert_eq!(
        outcome.source,
        ReadSource::Database {
            instance: "replica-1".to_string()
        }
    );
    assert_eq!(stack.executor.calls(), 2);

    stack.stop();
}

#[tokio::test]
async fn test_balancer_observes_monitor_state() {
    let stack = stack(
        SharedStore::memory(),
        LimiterConfig::default(),
        CountingExecutor::new(json!(1), 5.0),
    )
    .await;

    // Selection syncs from the monitor, which has probed the replica
    // healthy during warmup.
    let picked = stack.balancer.select_replica(&stack.monitor);
    assert_eq!(picked.id, "replica-1");
    assert!(stack.balancer.replicas()[0].is_healthy);

    stack.stop();
}
