//! Manual exerciser for a worker pool (ambient surface, not a core concern).
//!
//! Spawns a pool backed by the bundled `procpool-test-worker` fixture binary, submits a batch of
//! `echo` tasks, and prints what comes back. Useful for poking at the pool by hand.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use procpool::config::PoolConfig;
use procpool::pool::Pool;

#[derive(Parser, Debug)]
#[command(name = "procpool-cli")]
#[command(about = "Exercise a worker pool manually", long_about = None)]
struct Args {
    /// Number of worker processes
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Number of tasks to submit
    #[arg(long, default_value_t = 8)]
    tasks: usize,

    /// Path to the worker binary (defaults to the fixture worker installed next to this binary)
    #[arg(long)]
    worker_bin: Option<PathBuf>,
}

/// `CARGO_BIN_EXE_*` is only populated for test/benchmark targets, not for a plain `[[bin]]` like
/// this one, so the sibling binary's path is resolved at runtime instead: cargo places every
/// `[[bin]]` target next to the others in the same `target/<profile>` directory.
fn sibling_worker_bin() -> Result<PathBuf> {
    let mut path = std::env::current_exe().context("could not resolve own executable path")?;
    let file_name = if cfg!(windows) {
        "procpool-test-worker.exe"
    } else {
        "procpool-test-worker"
    };
    path.set_file_name(file_name);
    Ok(path)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "procpool=info,warn".to_string()))
        .init();

    let args = Args::parse();
    let worker_bin = match args.worker_bin {
        Some(path) => path,
        None => sibling_worker_bin()?,
    };

    let config = PoolConfig::new(args.workers, worker_bin);
    let pool = Pool::new(config)?;

    let tasks = (0..args.tasks)
        .map(|i| ("echo".to_string().into(), serde_json::json!(i)))
        .collect();
    let handles = pool.submit_batch(tasks, 1).await;

    for (i, handle) in handles.into_iter().enumerate() {
        match handle.get(None).await {
            Ok(value) => tracing::info!(task = i, result = %value, "task completed"),
            Err(err) => tracing::warn!(task = i, %err, "task failed"),
        }
    }

    pool.terminate().await?;
    pool.join().await;
    Ok(())
}
