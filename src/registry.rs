//! Process-wide singleton accessor for [`Pool`].
//!
//! There is no implicit construction on first use: the pool is created, resized, or reused only
//! when [`get_or_create`] is actually called.

use std::sync::OnceLock;

use tokio::sync::Mutex;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::pool::Pool;

static REGISTRY: OnceLock<Mutex<Option<(usize, Pool)>>> = OnceLock::new();

/// Return the process-wide pool, creating it if it doesn't exist yet. If one exists with a
/// different size than `config.size`, it is resized in place and returned; if the size matches,
/// the existing pool is returned untouched (no workers are restarted).
pub async fn get_or_create(config: PoolConfig) -> Result<Pool, PoolError> {
    let cell = REGISTRY.get_or_init(|| Mutex::new(None));
    let mut guard = cell.lock().await;

    if let Some((size, pool)) = guard.as_ref() {
        if *size == config.size {
            return Ok(pool.clone());
        }
    }

    if let Some((_, pool)) = guard.take() {
        pool.resize(config.size).await?;
        *guard = Some((config.size, pool.clone()));
        return Ok(pool);
    }

    let pool = Pool::new(config.clone())?;
    *guard = Some((config.size, pool.clone()));
    Ok(pool)
}
