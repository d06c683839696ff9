//! Worker-side registry mapping a [`CallableId`] to an executable function.
//!
//! The callable dispatched to a worker is serialized by reference, not by value — the worker
//! process resolves the reference in its own address space via a `CallableRegistry` the embedding
//! binary builds in its own `main`.

use std::collections::HashMap;

use serde_json::Value;

use crate::task::CallableId;

/// What a callable produced, before the worker's outer loop turns it into a [`crate::protocol::ResultFrame`].
///
/// `EncodeFailure` exists to let a callable simulate "the return value could not be serialized"
/// without this crate needing a return type whose encoding can genuinely fail — under the default
/// `serde_json::Value` representation, encoding a value that was already constructed as a `Value`
/// practically never fails.
pub enum CallableOutcome {
    Ok(Value),
    UserError(String),
    EncodeFailure(String),
}

/// A function a worker can invoke, taking decoded arguments and returning an outcome.
pub type CallableFn = Box<dyn Fn(Value) -> CallableOutcome + Send + Sync>;

/// Maps [`CallableId`]s to functions the worker process knows how to run.
#[derive(Default)]
pub struct CallableRegistry {
    callables: HashMap<CallableId, CallableFn>,
}

impl CallableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callable under `id`. Panics on duplicate registration — a programmer error in
    /// the embedding binary, not a runtime condition.
    pub fn register(
        &mut self,
        id: impl Into<CallableId>,
        f: impl Fn(Value) -> CallableOutcome + Send + Sync + 'static,
    ) -> &mut Self {
        let id = id.into();
        if self.callables.insert(id.clone(), Box::new(f)).is_some() {
            panic!("callable {id} registered twice");
        }
        self
    }

    pub fn get(&self, id: &CallableId) -> Option<&CallableFn> {
        self.callables.get(id)
    }
}
