//! Peer-kill race: workers killing each other concurrently must never corrupt routing of results
//! to the wrong handle, and the pool must still be usable afterwards.

mod common;

use procpool::pool::Pool;
use serde_json::json;

async fn peer_kill_race(n: usize) {
    let pool = Pool::new(common::fixture_config(n)).unwrap();

    // One get_pid per worker, submitted and awaited one at a time so round-robin dispatch visits
    // every currently-idle worker exactly once.
    let mut pids = Vec::with_capacity(n);
    for _ in 0..n {
        let handle = pool.submit("get_pid", json!({})).await;
        let pid = handle.get(None).await.unwrap().as_i64().unwrap();
        pids.push(pid);
    }

    // 2n concurrent kills, targeting the collected pids in reverse order twice over.
    let tasks = (0..2 * n)
        .map(|i| {
            let target = pids[(n - 1) - (i % n)];
            (
                "kill_friend".into(),
                json!({"pid": target, "delay_ms": 5}),
            )
        })
        .collect();
    let handles = pool.submit_batch(tasks, 1).await;

    for handle in handles {
        match handle.get(Some(std::time::Duration::from_secs(5))).await {
            Ok(value) => assert_eq!(value, json!(true)),
            Err(procpool::PoolError::AbortedWorker) => {}
            Err(other) => panic!("unexpected failure from peer-kill race: {other}"),
        }
    }

    // The pool must have respawned every killed worker; a plain task still completes.
    let ok = pool
        .submit("sleep_then_return", json!({"seconds": 0.0, "value": 1}))
        .await;
    assert_eq!(ok.get(Some(std::time::Duration::from_secs(5))).await.unwrap(), json!(1));

    pool.terminate().await.unwrap();
    pool.join().await;
}

#[tokio::test]
async fn peer_kill_race_single_worker() {
    peer_kill_race(1).await;
}

#[tokio::test]
async fn peer_kill_race_two_workers() {
    peer_kill_race(2).await;
}

#[tokio::test]
async fn peer_kill_race_five_workers() {
    peer_kill_race(5).await;
}

#[tokio::test]
async fn peer_kill_race_seventeen_workers() {
    peer_kill_race(17).await;
}
