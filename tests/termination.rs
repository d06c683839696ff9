//! Termination and resize-shrink behavior.

mod common;

use std::time::{Duration, Instant};

use procpool::pool::Pool;
use serde_json::json;

#[tokio::test]
async fn terminate_while_busy_joins_quickly_and_cancels_everything() {
    let pool = Pool::new(common::fixture_config(4)).unwrap();

    let tasks = (0..50)
        .map(|_| ("sleep_then_return".into(), json!({"seconds": 5.0, "value": 1})))
        .collect();
    let handles = pool.submit_batch(tasks, 1).await;

    let start = Instant::now();
    pool.terminate().await.unwrap();
    pool.join().await;
    assert!(
        start.elapsed() < Duration::from_secs(1),
        "terminate+join took {:?}, expected well under the 5s task sleep",
        start.elapsed()
    );

    for handle in handles {
        let err = handle.get(None).await.unwrap_err();
        assert!(matches!(err, procpool::PoolError::PoolTerminated));
    }
}

#[tokio::test]
async fn resize_shrink_waits_for_busy_worker_before_removing_it() {
    let pool = Pool::new(common::fixture_config(2)).unwrap();

    let busy = pool
        .submit("sleep_then_return", json!({"seconds": 0.3, "value": 1}))
        .await;

    let start = Instant::now();
    pool.resize(1).await.unwrap();
    let elapsed = start.elapsed();

    assert!(
        elapsed >= Duration::from_millis(250),
        "resize returned after {elapsed:?}, before the busy task could have finished"
    );
    assert_eq!(busy.get(None).await.unwrap(), json!(1));

    let ok = pool
        .submit("sleep_then_return", json!({"seconds": 0.0, "value": 2}))
        .await;
    assert_eq!(ok.get(None).await.unwrap(), json!(2));

    pool.terminate().await.unwrap();
    pool.join().await;
}

#[tokio::test]
async fn resize_to_same_size_is_a_no_op() {
    let pool = Pool::new(common::fixture_config(3)).unwrap();
    pool.resize(3).await.unwrap();

    let ok = pool
        .submit("sleep_then_return", json!({"seconds": 0.0, "value": 1}))
        .await;
    assert_eq!(ok.get(None).await.unwrap(), json!(1));

    pool.terminate().await.unwrap();
    pool.join().await;
}
