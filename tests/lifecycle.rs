//! Normal execution, recoverable failures, and worker crashes — the pool must keep serving new
//! submissions after each one.

mod common;

use procpool::pool::Pool;
use serde_json::json;

#[tokio::test]
async fn normal_execution_returns_value() {
    let pool = Pool::new(common::fixture_config(2)).unwrap();

    let handle = pool
        .submit("sleep_then_return", json!({"seconds": 0.0, "value": 1}))
        .await;
    assert_eq!(handle.get(None).await.unwrap(), json!(1));

    pool.terminate().await.unwrap();
    pool.join().await;
}

#[tokio::test]
async fn user_exception_does_not_affect_later_submissions() {
    let pool = Pool::new(common::fixture_config(2)).unwrap();

    let failed = pool.submit("raise_error", json!({})).await;
    let err = failed.get(None).await.unwrap_err();
    assert!(matches!(err, procpool::PoolError::UserError(_)));

    let ok = pool
        .submit("sleep_then_return", json!({"seconds": 0.0, "value": 1}))
        .await;
    assert_eq!(ok.get(None).await.unwrap(), json!(1));

    pool.terminate().await.unwrap();
    pool.join().await;
}

#[tokio::test]
async fn worker_crash_is_reported_and_pool_recovers() {
    let pool = Pool::new(common::fixture_config(2)).unwrap();

    let crashed = pool.submit("segfault", json!({})).await;
    let err = crashed.get(None).await.unwrap_err();
    assert!(matches!(err, procpool::PoolError::AbortedWorker));

    let ok = pool
        .submit("sleep_then_return", json!({"seconds": 0.0, "value": 1}))
        .await;
    assert_eq!(ok.get(None).await.unwrap(), json!(1));

    pool.terminate().await.unwrap();
    pool.join().await;
}

#[tokio::test]
async fn abrupt_exit_is_reported_and_pool_recovers() {
    let pool = Pool::new(common::fixture_config(2)).unwrap();

    let crashed = pool.submit("exit_nonzero", json!({})).await;
    let err = crashed.get(None).await.unwrap_err();
    assert!(matches!(err, procpool::PoolError::AbortedWorker));

    let ok = pool
        .submit("sleep_then_return", json!({"seconds": 0.0, "value": 1}))
        .await;
    assert_eq!(ok.get(None).await.unwrap(), json!(1));

    pool.terminate().await.unwrap();
    pool.join().await;
}

#[tokio::test]
async fn submit_batch_with_chunksize_preserves_positional_pairing() {
    let pool = Pool::new(common::fixture_config(2)).unwrap();

    let tasks = (0..9)
        .map(|i| ("echo".into(), json!(i)))
        .collect();
    let handles = pool.submit_batch(tasks, 4).await;

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.get(None).await.unwrap(), json!(i));
    }

    pool.terminate().await.unwrap();
    pool.join().await;
}

#[tokio::test]
async fn result_encode_failure_fails_only_that_handle() {
    let pool = Pool::new(common::fixture_config(2)).unwrap();

    let poisoned = pool.submit("encode_failure", json!({})).await;
    let err = poisoned.get(None).await.unwrap_err();
    assert!(matches!(
        err,
        procpool::PoolError::SerializationError { kind, .. } if kind == "output"
    ));

    let ok = pool
        .submit("sleep_then_return", json!({"seconds": 0.0, "value": 1}))
        .await;
    assert_eq!(ok.get(None).await.unwrap(), json!(1));

    pool.terminate().await.unwrap();
    pool.join().await;
}
