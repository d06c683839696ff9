//! `get_or_create` singleton behavior.
//!
//! These share one process-wide registry, so — unlike the other integration tests — they live in
//! a single test function run in sequence rather than independent `#[tokio::test]`s that would
//! race each other over the same singleton.

mod common;

use procpool::registry::get_or_create;
use serde_json::json;

#[tokio::test]
async fn get_or_create_lifecycle() {
    let err = get_or_create(common::fixture_config(0)).await.unwrap_err();
    assert!(matches!(err, procpool::PoolError::InvalidArgument(_)));

    let first = get_or_create(common::fixture_config(2)).await.unwrap();
    let ok = first
        .submit("sleep_then_return", json!({"seconds": 0.0, "value": 1}))
        .await;
    assert_eq!(ok.get(None).await.unwrap(), json!(1));

    // Same size: same pool identity, no workers restarted.
    let same = get_or_create(common::fixture_config(2)).await.unwrap();
    let ok = same
        .submit("sleep_then_return", json!({"seconds": 0.0, "value": 2}))
        .await;
    assert_eq!(ok.get(None).await.unwrap(), json!(2));

    // Different size: existing pool resized in place rather than replaced.
    let resized = get_or_create(common::fixture_config(1)).await.unwrap();
    let ok = resized
        .submit("sleep_then_return", json!({"seconds": 0.0, "value": 3}))
        .await;
    assert_eq!(ok.get(None).await.unwrap(), json!(3));

    resized.terminate().await.unwrap();
    resized.join().await;
}
