//! Rate limiting through the read path, including shared quotas and
//! degraded-store behavior.

use serde_json::json;

use argus::config::LimiterConfig;
use argus::limiter::ClientType;
use argus::{ReadError, ReadRequest, SharedStore};

use crate::{stack, CountingExecutor};

fn keyed_request(n: usize, user: &str) -> ReadRequest {
    ReadRequest::new(
        &format!("item:{n}"),
        &format!("SELECT * FROM items WHERE id = {n}"),
        user,
    )
}

#[tokio::test]
async fn test_quota_is_shared_through_the_store() {
    let store = SharedStore::memory();
    let limits = LimiterConfig {
        user_limit: 3,
        ..LimiterConfig::default()
    };
    let a = stack(
        store.clone(),
        limits.clone(),
        CountingExecutor::new(json!(1), 5.0),
    )
    .await;
    let b = stack(store, limits, CountingExecutor::new(json!(1), 5.0)).await;

    // Three reads across two processes consume one shared quota.
    a.path.fetch(&keyed_request(1, "user-7")).await.unwrap();
    a.path.fetch(&keyed_request(2, "user-7")).await.unwrap();
    b.path.fetch(&keyed_request(3, "user-7")).await.unwrap();

    match b.path.fetch(&keyed_request(4, "user-7")).await {
        Err(ReadError::RateLimited(result)) => {
            assert_eq!(result.limit, 3);
            assert_eq!(result.remaining, 0);
        }
        other => panic!("expected rate limited, got {other:?}"),
    }

    // A different user is unaffected.
    b.path.fetch(&keyed_request(5, "user-8")).await.unwrap();

    a.stop();
    b.stop();
}

#[tokio::test]
async fn test_mobile_quota_is_separate_from_web() {
    let limits = LimiterConfig {
        user_limit: 1,
        mobile_limit: 2,
        ..LimiterConfig::default()
    };
    let stack = stack(
        SharedStore::memory(),
        limits,
        CountingExecutor::new(json!(1), 5.0),
    )
    .await;

    // Exhaust the web quota.
    stack.path.fetch(&keyed_request(1, "user-7")).await.unwrap();
    let mut web = keyed_request(2, "user-7");
    web.client_type = ClientType::Web;
    assert!(matches!(
        stack.path.fetch(&web).await,
        Err(ReadError::RateLimited(_))
    ));

    // iOS runs on its own window and limit.
    for n in 3..5 {
        let mut ios = keyed_request(n, "user-7");
        ios.client_type = ClientType::Ios;
        stack.path.fetch(&ios).await.unwrap();
    }
    let mut ios = keyed_request(5, "user-7");
    ios.client_type = ClientType::Ios;
    assert!(matches!(
        stack.path.fetch(&ios).await,
        Err(ReadError::RateLimited(_))
    ));

    stack.stop();
}

#[tokio::test]
async fn test_disabled_store_fails_open() {
    let limits = LimiterConfig {
        user_limit: 1,
        ..LimiterConfig::default()
    };
    let stack = stack(
        SharedStore::disabled(),
        limits,
        CountingExecutor::new(json!(1), 5.0),
    )
    .await;

    // Far past the configured limit, every read is still admitted; with
    // no store there is no tier-2 either, so each distinct key reaches
    // the executor.
    for n in 0..5 {
        stack.path.fetch(&keyed_request(n, "user-7")).await.unwrap();
    }
    assert_eq!(stack.executor.calls(), 5);

    stack.stop();
}

#[tokio::test]
async fn test_admin_bypass_skips_all_windows() {
    let limits = LimiterConfig {
        user_limit: 1,
        ..LimiterConfig::default()
    };
    let stack = stack(
        SharedStore::memory(),
        limits,
        CountingExecutor::new(json!(1), 5.0),
    )
    .await;

    for n in 0..4 {
        let mut request = keyed_request(n, "admin-1");
        request.is_admin = true;
        stack.path.fetch(&request).await.unwrap();
    }

    // Bypassed reads never touched the admin's own window.
    let info = stack
        .limiter
        .get_limit_info("admin-1", ClientType::Web)
        .await;
    assert_eq!(info.used, 0);

    stack.stop();
}
