//! # Tasks, contexts and handles
//!
//! Cancellation is **cooperative**: nothing interrupts a running task body. A body
//! observes cancellation through its [`TaskContext`], either by polling
//! [`checkpoint`](TaskContext::checkpoint) at safe points or by awaiting
//! [`cancelled`](TaskContext::cancelled) inside a `select!`. A body that returns `Ok`
//! after a cancellation request reports `Completed`, not `Cancelled`.
//!
//! ```rust,ignore
//! let handle = executor.submit(|ctx| async move {
//!     for invoice in invoices {
//!         ctx.checkpoint()?;
//!         post(invoice).await.map_err(TaskError::failed)?;
//!     }
//!     Ok(())
//! })?;
//! handle.cancel();
//! ```

use super::TaskError;
use crate::environment::ProcessEnvironment;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};

/// Monotonic identifier of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task_{}", self.0)
    }
}

/// A flag that can be raised once and polled or awaited by any number of tasks.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    inner: Arc<FlagInner>,
}

#[derive(Debug, Default)]
struct FlagInner {
    raised: AtomicBool,
    notify: Notify,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if !self.inner.raised.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.raised.load(Ordering::SeqCst)
    }

    /// Resolves once the flag is raised.
    pub async fn cancelled(&self) {
        loop {
            // Registered before the check, so a concurrent `cancel` cannot be missed.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Observable lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Submitted,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskStatus::Submitted,
            1 => TaskStatus::Running,
            2 => TaskStatus::Completed,
            3 => TaskStatus::Failed,
            _ => TaskStatus::Cancelled,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            TaskStatus::Submitted => 0,
            TaskStatus::Running => 1,
            TaskStatus::Completed => 2,
            TaskStatus::Failed => 3,
            TaskStatus::Cancelled => 4,
        }
    }

    pub(crate) fn of<T>(outcome: &Result<T, TaskError>) -> Self {
        match outcome {
            Ok(_) => TaskStatus::Completed,
            Err(TaskError::Cancelled) => TaskStatus::Cancelled,
            Err(_) => TaskStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct StatusCell(Arc<AtomicU8>);

impl StatusCell {
    pub(crate) fn get(&self) -> TaskStatus {
        TaskStatus::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn set(&self, status: TaskStatus) {
        self.0.store(status.as_u8(), Ordering::SeqCst);
    }
}

/// What a running task body can see of its surroundings.
#[derive(Debug, Clone)]
pub struct TaskContext {
    id: TaskId,
    cancel: CancellationFlag,
    shutdown: CancellationFlag,
    environment: Arc<ProcessEnvironment>,
}

impl TaskContext {
    pub(crate) fn new(
        id: TaskId,
        cancel: CancellationFlag,
        shutdown: CancellationFlag,
        environment: Arc<ProcessEnvironment>,
    ) -> Self {
        Self {
            id,
            cancel,
            shutdown,
            environment,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// The published process environment, for formatting dates and amounts.
    pub fn environment(&self) -> &Arc<ProcessEnvironment> {
        &self.environment
    }

    /// True once the task's handle was cancelled or the executor gave up draining.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.shutdown.is_cancelled()
    }

    /// Returns `Err(TaskError::Cancelled)` if cancellation was requested.
    pub fn checkpoint(&self) -> Result<(), TaskError> {
        if self.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when cancellation is requested.
    pub async fn cancelled(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.shutdown.cancelled() => {}
        }
    }
}

/// Worker-side end of a task's result channel.
///
/// Dropped without an outcome (the task was still queued or running when the executor
/// was torn down) it records `Cancelled`, and the handle observes a closed channel.
pub(crate) struct Completion<T> {
    sender: Option<oneshot::Sender<Result<T, TaskError>>>,
    status: StatusCell,
}

impl<T> Completion<T> {
    pub(crate) fn new(sender: oneshot::Sender<Result<T, TaskError>>, status: StatusCell) -> Self {
        Self {
            sender: Some(sender),
            status,
        }
    }

    pub(crate) fn finish(mut self, outcome: Result<T, TaskError>) {
        self.status.set(TaskStatus::of(&outcome));
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(outcome);
        }
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if self.sender.is_some() {
            self.status.set(TaskStatus::Cancelled);
        }
    }
}

/// Submitter-side handle of a task.
#[derive(Debug)]
pub struct TaskHandle<T> {
    id: TaskId,
    cancel: CancellationFlag,
    status: StatusCell,
    result: oneshot::Receiver<Result<T, TaskError>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(
        id: TaskId,
        cancel: CancellationFlag,
        status: StatusCell,
        result: oneshot::Receiver<Result<T, TaskError>>,
    ) -> Self {
        Self {
            id,
            cancel,
            status,
            result,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn status(&self) -> TaskStatus {
        self.status.get()
    }

    /// Requests cooperative cancellation. A task that has not started yet is never run.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the task's outcome.
    pub async fn join(self) -> Result<T, TaskError> {
        self.result.await.unwrap_or(Err(TaskError::Cancelled))
    }

    /// Waits for the task's outcome for at most `timeout`.
    ///
    /// On expiry returns [`TaskError::Timeout`]; the task keeps running and the handle can
    /// be joined again.
    pub async fn join_timeout(&mut self, timeout: Duration) -> Result<T, TaskError> {
        match tokio::time::timeout(timeout, &mut self.result).await {
            Ok(received) => received.unwrap_or(Err(TaskError::Cancelled)),
            Err(_) => Err(TaskError::Timeout),
        }
    }
}
