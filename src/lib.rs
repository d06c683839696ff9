//! A reusable worker-process pool that survives worker crashes and resizes in place.
//!
//! A [`pool::Pool`] owns a fixed-but-resizable set of child processes (spawned from a binary that
//! calls [`worker::run`] in its `main`), dispatches [`Handle`]-returning tasks to them over a
//! length-prefixed stdin/stdout protocol, and recovers transparently from a worker dying at any
//! point in a task's lifecycle.

pub mod callable;
pub mod codec;
pub mod config;
pub mod error;
pub mod handle;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod task;
pub mod worker;

mod worker_proc;

pub use callable::{CallableOutcome, CallableRegistry};
pub use codec::{Codec, JsonCodec};
pub use config::PoolConfig;
pub use error::{CodecError, PoolError};
pub use handle::Handle;
pub use pool::Pool;
pub use task::{CallableId, JobId, TaskId, TaskOutcome};
