//! # Async Task Executor
//!
//! A bounded worker pool shared by asynchronous tasks and scheduled job bodies.
//!
//! ## Admission control
//!
//! The executor admits at most `pool_size + queue_depth` tasks at once: `pool_size`
//! running on the workers and up to `queue_depth` waiting in the queue. The next
//! submission is rejected with [`TaskError::Overloaded`] instead of growing memory,
//! so a slow downstream (an AI agent call, the WhatsApp API) pushes back on its callers.
//! Admission is decided synchronously at submission time, so callers never block.
//!
//! ## Failure isolation
//!
//! Task bodies that fail or panic report [`TaskError::Failed`] on their handle and are
//! logged; the worker that ran them carries on. Nothing is retried here, because retry
//! policy belongs to the caller.
//!
//! ## Shutdown
//!
//! [`AsyncExecutor::shutdown`] stops admitting work, lets the workers drain the queue
//! and finish running tasks for up to the grace period, then raises the shutdown
//! cancellation flag and tears the workers down. Every task that had not finished by
//! then reports [`TaskError::Cancelled`].

pub mod error;
pub mod task;

pub use error::TaskError;
pub use task::{CancellationFlag, TaskContext, TaskHandle, TaskId, TaskStatus};

use crate::config::ExecutorConfig;
use crate::environment::ProcessEnvironment;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use task::{Completion, StatusCell};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type QueuedTask = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

struct ExecutorInner {
    config: ExecutorConfig,
    environment: Arc<ProcessEnvironment>,
    admission: Arc<Semaphore>,
    sender: Mutex<Option<mpsc::Sender<QueuedTask>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationFlag,
    next_id: AtomicU64,
}

/// Cloneable handle to the shared worker pool.
#[derive(Clone)]
pub struct AsyncExecutor {
    inner: Arc<ExecutorInner>,
}

impl AsyncExecutor {
    /// Spawns `pool_size` workers on the current Tokio runtime.
    pub fn start(config: ExecutorConfig, environment: Arc<ProcessEnvironment>) -> Self {
        let pool_size = config.pool_size.max(1);
        let capacity = pool_size + config.queue_depth;
        let (sender, receiver) = mpsc::channel::<QueuedTask>(capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let workers = (0..pool_size)
            .map(|worker| tokio::spawn(run_worker(worker, receiver.clone())))
            .collect();

        info!(
            pool_size,
            queue_depth = config.queue_depth,
            "Executor started"
        );

        Self {
            inner: Arc::new(ExecutorInner {
                config,
                environment,
                admission: Arc::new(Semaphore::new(capacity)),
                sender: Mutex::new(Some(sender)),
                workers: Mutex::new(workers),
                shutdown: CancellationFlag::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    /// Number of admitted tasks that have not finished yet (running plus queued).
    pub fn in_flight(&self) -> usize {
        if self.inner.admission.is_closed() {
            return 0;
        }
        let capacity = self.inner.config.pool_size.max(1) + self.inner.config.queue_depth;
        capacity - self.inner.admission.available_permits()
    }

    pub fn is_accepting(&self) -> bool {
        !self.inner.admission.is_closed()
    }

    /// Submits a result-bearing task.
    ///
    /// Returns [`TaskError::Overloaded`] when the pool and queue are full or the
    /// executor is shutting down.
    pub fn submit<T, F, Fut>(&self, task: F) -> Result<TaskHandle<T>, TaskError>
    where
        T: Send + 'static,
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        let permit = self
            .inner
            .admission
            .clone()
            .try_acquire_owned()
            .map_err(|_| {
                debug!("Submission rejected");
                TaskError::Overloaded
            })?;

        let id = TaskId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel = CancellationFlag::new();
        let status = StatusCell::default();
        let (result_tx, result_rx) = oneshot::channel();
        let completion = Completion::new(result_tx, status.clone());
        let context = TaskContext::new(
            id,
            cancel.clone(),
            self.inner.shutdown.clone(),
            self.inner.environment.clone(),
        );
        let running = status.clone();

        let queued: QueuedTask = Box::new(move || {
            async move {
                let _permit = permit;
                let outcome = if context.is_cancelled() {
                    Err(TaskError::Cancelled)
                } else {
                    running.set(TaskStatus::Running);
                    debug!(task_id = %id, "Task started");
                    AssertUnwindSafe(async move { task(context).await })
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| Err(TaskError::Failed(panic_message(panic))))
                };
                match &outcome {
                    Ok(_) => debug!(task_id = %id, "Task completed"),
                    Err(TaskError::Cancelled) => info!(task_id = %id, "Task cancelled"),
                    Err(e) => warn!(task_id = %id, error = %e, "Task failed"),
                }
                completion.finish(outcome);
            }
            .boxed()
        });

        let sender = self
            .inner
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(TaskError::Overloaded)?;
        sender.try_send(queued).map_err(|_| TaskError::Overloaded)?;

        debug!(task_id = %id, "Task submitted");
        Ok(TaskHandle::new(id, cancel, status, result_rx))
    }

    /// Submits a fire-and-forget task. Its failure is logged by the worker.
    pub fn execute<F, Fut>(&self, task: F) -> Result<TaskId, TaskError>
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.submit(task).map(|handle| handle.id())
    }

    /// Stops admission and drains in-flight work for up to `grace`.
    ///
    /// Returns `true` when everything finished within the grace period. Otherwise the
    /// remaining tasks are cancelled and report [`TaskError::Cancelled`].
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.inner.admission.close();
        // Dropping the last sender lets the workers exit once the queue is empty.
        drop(
            self.inner
                .sender
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take(),
        );

        let workers: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self
                .inner
                .workers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        if workers.is_empty() {
            return true;
        }
        info!(grace = ?grace, "Executor draining");

        let aborts: Vec<_> = workers.iter().map(|worker| worker.abort_handle()).collect();
        match tokio::time::timeout(grace, join_all(workers)).await {
            Ok(_) => {
                info!("Executor drained");
                true
            }
            Err(_) => {
                warn!(grace = ?grace, "Grace period elapsed, cancelling remaining tasks");
                self.inner.shutdown.cancel();
                for abort in aborts {
                    abort.abort();
                }
                false
            }
        }
    }
}

async fn run_worker(worker: usize, queue: Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedTask>>>) {
    debug!(worker, "Worker started");
    loop {
        let next = queue.lock().await.recv().await;
        match next {
            Some(task) => task().await,
            None => break,
        }
    }
    debug!(worker, "Worker stopped");
}

pub(crate) fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}
