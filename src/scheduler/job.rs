use crate::executor::{TaskContext, TaskError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// What happens when a job fires while a previous run is still going.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyPolicy {
    /// Drop the fire.
    #[default]
    SkipIfRunning,
    /// Buffer at most one fire and start it when the current run completes.
    Queue,
    /// Start every fire. No overlap guarantee.
    RunConcurrently,
}

/// Body of a scheduled job.
///
/// The body runs on the shared executor with the same cooperative cancellation as
/// any other task. Returning an error emits `JobFailed`; the job keeps its schedule.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    async fn run(&self, ctx: TaskContext) -> Result<(), TaskError>;
}

/// Adapts a closure into a [`Job`].
pub struct FnJob<F>(F);

pub fn job_fn<F, Fut>(body: F) -> FnJob<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    FnJob(body)
}

#[async_trait]
impl<F, Fut> Job for FnJob<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    async fn run(&self, ctx: TaskContext) -> Result<(), TaskError> {
        (self.0)(ctx).await
    }
}
