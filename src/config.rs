//! Pool configuration.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::codec::{Codec, JsonCodec};

/// Configuration for spawning and supervising a worker pool.
#[derive(Clone)]
pub struct PoolConfig {
    /// Number of worker processes to maintain.
    pub size: usize,
    /// Binary to spawn for each worker. Must be a binary that calls
    /// [`crate::worker::run`] in its `main`.
    pub worker_bin: PathBuf,
    /// Extra arguments passed to `worker_bin` on every spawn.
    pub worker_args: Vec<OsString>,
    /// Capacity of the bounded task queue.
    pub queue_capacity: usize,
    /// Window within which two or more sentinel firings are treated as a suspected broadcast
    /// death, failing every currently-busy worker rather than just the one observed.
    pub broadcast_death_window: Duration,
    /// Grace period given to a worker to exit cleanly after `terminate()` before it is
    /// force-killed.
    pub termination_grace: Duration,
    /// Wire codec used to encode task arguments and decode task results. Defaults to JSON;
    /// swappable for embedders who need a different payload representation.
    pub codec: Arc<dyn Codec>,
}

impl std::fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolConfig")
            .field("size", &self.size)
            .field("worker_bin", &self.worker_bin)
            .field("worker_args", &self.worker_args)
            .field("queue_capacity", &self.queue_capacity)
            .field("broadcast_death_window", &self.broadcast_death_window)
            .field("termination_grace", &self.termination_grace)
            .finish_non_exhaustive()
    }
}

impl PoolConfig {
    pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
    pub const DEFAULT_BROADCAST_DEATH_WINDOW: Duration = Duration::from_millis(100);
    pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_millis(500);

    /// A config with `size` workers running `worker_bin` and otherwise-default tuning.
    pub fn new(size: usize, worker_bin: impl Into<PathBuf>) -> Self {
        Self {
            size,
            worker_bin: worker_bin.into(),
            worker_args: Vec::new(),
            queue_capacity: Self::DEFAULT_QUEUE_CAPACITY,
            broadcast_death_window: Self::DEFAULT_BROADCAST_DEATH_WINDOW,
            termination_grace: Self::DEFAULT_TERMINATION_GRACE,
            codec: Arc::new(JsonCodec),
        }
    }

    /// `size` defaulted to the number of logical CPUs, as `num_cpus` reports.
    pub fn with_default_size(worker_bin: impl Into<PathBuf>) -> Self {
        Self::new(num_cpus::get().max(1), worker_bin)
    }
}
