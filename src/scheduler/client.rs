use super::message::{Response, SchedulerRequest};
use super::{job_fn, ConcurrencyPolicy, Job, JobState, SchedulerError, SchedulerEvent, Trigger};
use crate::config::JobConfig;
use crate::executor::{TaskContext, TaskError};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, instrument};

/// Cloneable handle to the scheduler's coordination task.
#[derive(Clone)]
pub struct SchedulerClient {
    sender: mpsc::Sender<SchedulerRequest>,
    events: broadcast::Sender<SchedulerEvent>,
    configured: Arc<BTreeMap<String, JobConfig>>,
}

impl SchedulerClient {
    pub fn new(
        sender: mpsc::Sender<SchedulerRequest>,
        events: broadcast::Sender<SchedulerEvent>,
        configured: BTreeMap<String, JobConfig>,
    ) -> Self {
        Self {
            sender,
            events,
            configured: Arc::new(configured),
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Response<T>) -> SchedulerRequest,
    ) -> Result<T, SchedulerError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(build(respond_to))
            .await
            .map_err(|_| SchedulerError::Closed)?;
        response.await.map_err(|_| SchedulerError::Dropped)?
    }

    /// Registers a closure as a job body.
    pub async fn register<F, Fut>(
        &self,
        name: impl Into<String>,
        trigger: Trigger,
        policy: ConcurrencyPolicy,
        body: F,
    ) -> Result<(), SchedulerError>
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.register_job(name, trigger, policy, job_fn(body)).await
    }

    #[instrument(skip(self, name, trigger, job), fields(job = tracing::field::Empty))]
    pub async fn register_job(
        &self,
        name: impl Into<String>,
        trigger: Trigger,
        policy: ConcurrencyPolicy,
        job: impl Job,
    ) -> Result<(), SchedulerError> {
        let name = name.into();
        tracing::Span::current().record("job", name.as_str());
        debug!(?trigger, "register called");
        let job: Arc<dyn Job> = Arc::new(job);
        self.request(|respond_to| SchedulerRequest::Register {
            name,
            trigger,
            policy,
            job,
            respond_to,
        })
        .await
    }

    /// Registers a job under the trigger and policy declared in `job.<name>` of the
    /// runtime configuration.
    pub async fn register_configured<F, Fut>(
        &self,
        name: &str,
        body: F,
    ) -> Result<(), SchedulerError>
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let config = self
            .configured
            .get(name)
            .ok_or_else(|| SchedulerError::UnknownJob(name.to_string()))?;
        let trigger = Trigger::from_config(name, config)?;
        self.register(name, trigger, config.concurrency_policy, body)
            .await
    }

    /// Names of the jobs declared in configuration.
    pub fn configured_jobs(&self) -> impl Iterator<Item = &str> {
        self.configured.keys().map(String::as_str)
    }

    #[instrument(skip(self))]
    pub async fn unregister(&self, name: &str) -> Result<(), SchedulerError> {
        let name = name.to_string();
        self.request(|respond_to| SchedulerRequest::Unregister { name, respond_to })
            .await
    }

    pub async fn job_state(&self, name: &str) -> Result<JobState, SchedulerError> {
        let name = name.to_string();
        self.request(|respond_to| SchedulerRequest::State { name, respond_to })
            .await
    }

    /// Subscribes to job events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    /// Stops trigger evaluation. Runs already handed to the executor are left to it.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        self.request(|respond_to| SchedulerRequest::Shutdown { respond_to })
            .await
    }
}
