use std::path::PathBuf;
use std::time::Duration;

use procpool::config::PoolConfig;

/// A `PoolConfig` pointed at the bundled fixture worker, with shorter-than-default timing so
/// crash-recovery and termination tests don't take forever.
pub fn fixture_config(size: usize) -> PoolConfig {
    let mut config = PoolConfig::new(size, worker_bin());
    config.broadcast_death_window = Duration::from_millis(150);
    config.termination_grace = Duration::from_millis(200);
    config
}

fn worker_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_procpool-test-worker"))
}
