//! Error taxonomy surfaced to embedders and to individual task handles.

use thiserror::Error;

/// Failure kinds that can be returned from a [`crate::codec::Codec`] implementation.
#[derive(Debug, Error, Clone)]
#[error("{kind} codec error: {detail}")]
pub struct CodecError {
    /// Which side of the wire the failure happened on: "submit", "input", "output", "result".
    pub kind: String,
    pub detail: String,
}

impl CodecError {
    pub fn new(kind: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        Self {
            kind: kind.into(),
            detail: detail.to_string(),
        }
    }
}

/// Errors surfaced by the pool's public API and by individual task [`crate::handle::Handle`]s.
#[derive(Debug, Error, Clone)]
pub enum PoolError {
    /// Raised synchronously on the offending API call (e.g. `size == 0`).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The worker handling this task died before producing a result frame.
    #[error("worker handling this task was lost before it produced a result")]
    AbortedWorker,

    /// The pool was terminated before this handle completed.
    #[error("pool was terminated before this task completed")]
    PoolTerminated,

    /// The payload could not be encoded for dispatch, or the worker's result frame could not be
    /// decoded. `kind` distinguishes "submit" from "result".
    #[error("serialization error ({kind}): {detail}")]
    SerializationError { kind: String, detail: String },

    /// The task body itself signalled a recoverable failure.
    #[error("task raised an error: {0}")]
    UserError(String),

    /// `Handle::get(timeout)` expired; the task remains in flight.
    #[error("operation timed out")]
    OperationTimedOut,
}

impl From<CodecError> for PoolError {
    fn from(err: CodecError) -> Self {
        PoolError::SerializationError {
            kind: err.kind,
            detail: err.detail,
        }
    }
}
