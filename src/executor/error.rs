//! Error types for the async task executor.

use thiserror::Error;

/// Outcome of a task that did not complete successfully, or of a rejected submission.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    /// The pool and its queue are full, or the executor is shutting down.
    #[error("Executor overloaded")]
    Overloaded,

    /// The task body returned an error or panicked.
    #[error("Task failed: {0}")]
    Failed(String),

    /// The task observed a cancellation request, or was still pending when the
    /// shutdown grace period ran out.
    #[error("Task cancelled")]
    Cancelled,

    /// Waiting on the task's result exceeded the caller's bound. The task is unaffected.
    #[error("Timed out waiting for task result")]
    Timeout,
}

impl TaskError {
    /// Wraps any displayable error as a task failure.
    pub fn failed(cause: impl std::fmt::Display) -> Self {
        TaskError::Failed(cause.to_string())
    }
}
