//! Per-submission future object callers await.
//!
//! The supervisor never holds a strong reference to a `Handle`: it tracks a `Weak` pointer keyed
//! by `task_id`, so a caller that drops every clone of a `Handle` lets it (and its eventual
//! outcome) be reclaimed promptly instead of leaking in the in-flight map forever.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::Notify;

use crate::error::PoolError;
use crate::task::{TaskId, TaskOutcome};

#[derive(Debug)]
enum HandleState {
    Pending,
    Ready(TaskOutcome),
    /// The pool was terminated before this task reached a terminal outcome. Distinct from any
    /// `Result` variant since a worker never produces it.
    Cancelled,
}

struct HandleInner {
    state: Mutex<HandleState>,
    notify: Notify,
}

/// A weak, supervisor-side view of a [`Handle`] used to complete it without keeping it alive.
#[derive(Clone)]
pub(crate) struct WeakHandle {
    inner: Weak<HandleInner>,
}

impl WeakHandle {
    /// Complete the handle if the caller hasn't already dropped every strong reference to it.
    /// Returns `true` if the outcome was delivered.
    pub(crate) fn complete(&self, outcome: TaskOutcome) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        {
            let mut state = inner.state.lock().unwrap();
            if matches!(*state, HandleState::Pending) {
                *state = HandleState::Ready(outcome);
            }
        }
        inner.notify.notify_waiters();
        true
    }

    /// Move the handle to `Cancelled` (pool terminated). A no-op if already terminal.
    pub(crate) fn cancel(&self) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        {
            let mut state = inner.state.lock().unwrap();
            if matches!(*state, HandleState::Pending) {
                *state = HandleState::Cancelled;
            }
        }
        inner.notify.notify_waiters();
        true
    }
}

/// The caller-owned half of a submitted task's eventual outcome.
#[derive(Clone)]
pub struct Handle {
    inner: Arc<HandleInner>,
    task_id: TaskId,
}

impl Handle {
    pub(crate) fn new(task_id: TaskId) -> (Handle, WeakHandle) {
        let inner = Arc::new(HandleInner {
            state: Mutex::new(HandleState::Pending),
            notify: Notify::new(),
        });
        let weak = WeakHandle {
            inner: Arc::downgrade(&inner),
        };
        (Handle { inner, task_id }, weak)
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Await the task's terminal outcome. Safe to call from multiple clones of the same
    /// `Handle` concurrently; every observer sees the same outcome.
    pub async fn get(&self, timeout: Option<Duration>) -> Result<serde_json::Value, PoolError> {
        let terminal = async {
            loop {
                let notified = self.inner.notify.notified();
                {
                    let state = self.inner.state.lock().unwrap();
                    match &*state {
                        HandleState::Ready(outcome) => return Ok(outcome.clone()),
                        HandleState::Cancelled => return Err(PoolError::PoolTerminated),
                        HandleState::Pending => {}
                    }
                }
                notified.await;
            }
        };

        let result = match timeout {
            Some(d) => match tokio::time::timeout(d, terminal).await {
                Ok(result) => result,
                Err(_) => return Err(PoolError::OperationTimedOut),
            },
            None => terminal.await,
        };

        result.and_then(TaskOutcome::into_result)
    }

    /// Non-blocking peek: `Some(outcome)` if the task has already reached a terminal state.
    pub fn try_get(&self) -> Option<Result<serde_json::Value, PoolError>> {
        let state = self.inner.state.lock().unwrap();
        match &*state {
            HandleState::Ready(outcome) => Some(outcome.clone().into_result()),
            HandleState::Cancelled => Some(Err(PoolError::PoolTerminated)),
            HandleState::Pending => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_once_and_all_clones_observe_it() {
        let (handle, weak) = Handle::new(1);
        let clone = handle.clone();

        assert!(weak.complete(TaskOutcome::Ok(serde_json::json!(1))));

        assert_eq!(handle.get(None).await.unwrap(), serde_json::json!(1));
        assert_eq!(clone.get(None).await.unwrap(), serde_json::json!(1));
    }

    #[tokio::test]
    async fn dropped_handle_silently_discards_completion() {
        let (handle, weak) = Handle::new(1);
        drop(handle);
        assert!(!weak.complete(TaskOutcome::Ok(serde_json::json!(1))));
    }

    #[tokio::test]
    async fn cancelled_handle_reports_pool_terminated() {
        let (handle, weak) = Handle::new(1);
        assert!(weak.cancel());
        let err = handle.get(None).await.unwrap_err();
        assert!(matches!(err, PoolError::PoolTerminated));
        assert!(matches!(
            handle.try_get(),
            Some(Err(PoolError::PoolTerminated))
        ));
    }

    #[tokio::test]
    async fn cancel_does_not_override_an_already_ready_handle() {
        let (handle, weak) = Handle::new(1);
        assert!(weak.complete(TaskOutcome::Ok(serde_json::json!(1))));
        assert!(weak.cancel());
        assert_eq!(handle.get(None).await.unwrap(), serde_json::json!(1));
    }

    #[tokio::test]
    async fn timeout_leaves_task_pending() {
        let (handle, _weak) = Handle::new(1);
        let err = handle
            .get(Some(Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::OperationTimedOut));
        assert!(handle.try_get().is_none());
    }
}
