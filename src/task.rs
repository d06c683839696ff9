//! Task and outcome data model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type TaskId = u64;
pub type JobId = u64;
pub type Generation = u64;

/// An opaque reference to a function the worker can resolve in its own address space. The core
/// never inspects this beyond treating it as a lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallableId(pub String);

impl CallableId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl std::fmt::Display for CallableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CallableId {
    fn from(s: &str) -> Self {
        CallableId::new(s)
    }
}

impl From<String> for CallableId {
    fn from(s: String) -> Self {
        CallableId::new(s)
    }
}

/// The payload half of a submitted task. A task whose arguments were already rejected by the
/// codec at submission time carries `Poisoned` instead of bytes, so that dispatch can fail the
/// handle with a `submit`-kind `SerializationError` without ever touching a worker.
#[derive(Debug, Clone)]
pub enum TaskPayload {
    Encoded(Vec<u8>),
    Poisoned { detail: String },
}

/// A unit of work as tracked by the supervisor.
#[derive(Debug, Clone)]
pub struct Task {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub callable: CallableId,
    pub payload: TaskPayload,
}

/// The terminal outcome of a task, as observed by the caller.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Ok(Value),
    UserError(String),
    SerializationError { kind: String, detail: String },
    /// Synthesized by the supervisor; never produced by a worker.
    WorkerLost,
}

impl TaskOutcome {
    pub fn into_result(self) -> Result<Value, crate::error::PoolError> {
        use crate::error::PoolError;
        match self {
            TaskOutcome::Ok(v) => Ok(v),
            TaskOutcome::UserError(msg) => Err(PoolError::UserError(msg)),
            TaskOutcome::SerializationError { kind, detail } => {
                Err(PoolError::SerializationError { kind, detail })
            }
            TaskOutcome::WorkerLost => Err(PoolError::AbortedWorker),
        }
    }
}
