//! The coordination task.
//!
//! A single task owns every job's state and evaluates triggers. It processes requests
//! sequentially and sleeps until the earliest deadline between them, so job state needs
//! no locks. It never awaits a job body: each run is handed to the shared executor and
//! reports back with a [`SchedulerRequest::Finished`] message.

use super::message::SchedulerRequest;
use super::trigger::Deadline;
use super::{
    ConcurrencyPolicy, Job, JobState, MissedFireReason, SchedulerClient, SchedulerError,
    SchedulerEvent, Trigger,
};
use crate::config::JobConfig;
use crate::environment::ProcessEnvironment;
use crate::executor::{panic_message, AsyncExecutor, TaskError};
use futures::FutureExt;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 256;

struct ScheduledJob {
    trigger: Trigger,
    policy: ConcurrencyPolicy,
    job: Arc<dyn Job>,
    generation: u64,
    next_fire: Option<Deadline>,
    /// Runs accepted by the executor that no worker has picked up yet.
    triggered: usize,
    running: usize,
    pending: bool,
}

impl ScheduledJob {
    fn state(&self) -> JobState {
        if self.running > 0 {
            JobState::Running {
                runs: self.running,
                pending: self.pending,
            }
        } else if self.triggered > 0 {
            JobState::Triggered {
                pending: self.pending,
            }
        } else {
            JobState::Idle
        }
    }

    fn is_busy(&self) -> bool {
        self.triggered + self.running > 0
    }
}

pub struct SchedulerCoordinator {
    receiver: mpsc::Receiver<SchedulerRequest>,
    // Weak so that dropping every client stops the loop.
    sender: mpsc::WeakSender<SchedulerRequest>,
    events: broadcast::Sender<SchedulerEvent>,
    executor: AsyncExecutor,
    environment: Arc<ProcessEnvironment>,
    jobs: HashMap<String, ScheduledJob>,
    next_generation: u64,
}

impl SchedulerCoordinator {
    pub fn new(
        buffer_size: usize,
        executor: AsyncExecutor,
        environment: Arc<ProcessEnvironment>,
        configured: BTreeMap<String, JobConfig>,
    ) -> (Self, SchedulerClient) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let coordinator = Self {
            receiver,
            sender: sender.downgrade(),
            events: events.clone(),
            executor,
            environment,
            jobs: HashMap::new(),
            next_generation: 1,
        };
        let client = SchedulerClient::new(sender, events, configured);
        (coordinator, client)
    }

    /// Runs the coordination loop until shutdown or until every client is dropped.
    pub async fn run(mut self) {
        info!("Scheduler started");

        loop {
            let next_deadline = self
                .jobs
                .values()
                .filter_map(|job| job.next_fire.as_ref().map(|deadline| deadline.at))
                .min();

            tokio::select! {
                request = self.receiver.recv() => match request {
                    Some(SchedulerRequest::Shutdown { respond_to }) => {
                        info!(jobs = self.jobs.len(), "Scheduler shutting down");
                        let _ = respond_to.send(Ok(()));
                        break;
                    }
                    Some(request) => self.handle(request),
                    None => break,
                },
                _ = sleep_until(next_deadline), if next_deadline.is_some() => {
                    self.fire_due();
                }
            }
        }

        self.jobs.clear();
        info!("Scheduler stopped");
    }

    fn handle(&mut self, request: SchedulerRequest) {
        match request {
            SchedulerRequest::Register {
                name,
                trigger,
                policy,
                job,
                respond_to,
            } => {
                let _ = respond_to.send(self.register(name, trigger, policy, job));
            }
            SchedulerRequest::Unregister { name, respond_to } => {
                let result = match self.jobs.remove(&name) {
                    Some(_) => {
                        info!(job = %name, "Unregistered");
                        Ok(())
                    }
                    None => Err(SchedulerError::UnknownJob(name)),
                };
                let _ = respond_to.send(result);
            }
            SchedulerRequest::State { name, respond_to } => {
                let result = self
                    .jobs
                    .get(&name)
                    .map(ScheduledJob::state)
                    .ok_or(SchedulerError::UnknownJob(name));
                let _ = respond_to.send(result);
            }
            SchedulerRequest::Started { name, generation } => {
                if let Some(job) = self.current(&name, generation) {
                    job.triggered = job.triggered.saturating_sub(1);
                    job.running += 1;
                }
            }
            SchedulerRequest::Finished {
                name,
                generation,
                outcome,
            } => self.finished(name, generation, outcome),
            SchedulerRequest::Shutdown { respond_to } => {
                // Handled by the loop.
                let _ = respond_to.send(Ok(()));
            }
        }
    }

    fn register(
        &mut self,
        name: String,
        trigger: Trigger,
        policy: ConcurrencyPolicy,
        job: Arc<dyn Job>,
    ) -> Result<(), SchedulerError> {
        if self.jobs.contains_key(&name) {
            warn!(job = %name, "Duplicate registration");
            return Err(SchedulerError::DuplicateJob(name));
        }
        trigger.validate(&name)?;

        let next_fire = trigger.first_deadline(Instant::now(), self.environment.timezone());
        let generation = self.next_generation;
        self.next_generation += 1;
        info!(job = %name, ?trigger, ?policy, "Registered");

        self.jobs.insert(
            name,
            ScheduledJob {
                trigger,
                policy,
                job,
                generation,
                next_fire,
                triggered: 0,
                running: 0,
                pending: false,
            },
        );
        Ok(())
    }

    fn fire_due(&mut self) {
        let now = Instant::now();
        let timezone = self.environment.timezone();
        let due: Vec<String> = self
            .jobs
            .iter()
            .filter(|(_, job)| {
                job.next_fire
                    .as_ref()
                    .is_some_and(|deadline| deadline.at <= now)
            })
            .map(|(name, _)| name.clone())
            .collect();

        for name in due {
            let Some(job) = self.jobs.get_mut(&name) else {
                continue;
            };
            let Some(fired) = job.next_fire.take() else {
                continue;
            };
            job.next_fire = job.trigger.deadline_after_fire(&fired, now, timezone);
            self.fire(&name);
        }
    }

    fn fire(&mut self, name: &str) {
        let Some(job) = self.jobs.get_mut(name) else {
            return;
        };
        if !job.is_busy() {
            return self.dispatch(name);
        }
        match (job.policy, job.pending) {
            (ConcurrencyPolicy::SkipIfRunning, _) => self.missed(name, MissedFireReason::Skipped),
            (ConcurrencyPolicy::Queue, true) => self.missed(name, MissedFireReason::QueueFull),
            (ConcurrencyPolicy::Queue, false) => {
                job.pending = true;
                debug!(job = %name, "Fire queued");
            }
            (ConcurrencyPolicy::RunConcurrently, _) => self.dispatch(name),
        }
    }

    fn dispatch(&mut self, name: &str) {
        let Some(sender) = self.sender.upgrade() else {
            return;
        };
        let Some(job) = self.jobs.get_mut(name) else {
            return;
        };

        let body = job.job.clone();
        let generation = job.generation;
        let events = self.events.clone();
        let job_name = name.to_string();

        let submitted = self.executor.execute(move |ctx| async move {
            let _ = sender
                .send(SchedulerRequest::Started {
                    name: job_name.clone(),
                    generation,
                })
                .await;
            let _ = events.send(SchedulerEvent::Started {
                job: job_name.clone(),
            });
            let outcome = AssertUnwindSafe(body.run(ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(TaskError::Failed(panic_message(panic))));
            let _ = sender
                .send(SchedulerRequest::Finished {
                    name: job_name,
                    generation,
                    outcome: outcome.clone(),
                })
                .await;
            outcome
        });

        match submitted {
            Ok(task_id) => {
                job.triggered += 1;
                debug!(job = %name, %task_id, "Dispatched");
            }
            Err(_) => {
                let now = Instant::now();
                if job.next_fire.is_none() {
                    job.next_fire = job.trigger.deadline_after_completion(now);
                }
                self.missed(name, MissedFireReason::Overloaded);
            }
        }
    }

    fn finished(&mut self, name: String, generation: u64, outcome: Result<(), TaskError>) {
        let Some(job) = self.current(&name, generation) else {
            debug!(job = %name, "Run finished for unregistered job");
            return;
        };

        job.running = job.running.saturating_sub(1);
        if !job.is_busy() && job.next_fire.is_none() {
            job.next_fire = job.trigger.deadline_after_completion(Instant::now());
        }
        let start_pending = job.pending && !job.is_busy();
        if start_pending {
            job.pending = false;
        }

        let event = match outcome {
            Ok(()) => {
                info!(job = %name, "Completed");
                SchedulerEvent::Completed { job: name.clone() }
            }
            Err(e) => {
                warn!(job = %name, error = %e, "Job failed");
                let cause = match e {
                    TaskError::Failed(cause) => cause,
                    other => other.to_string(),
                };
                SchedulerEvent::JobFailed {
                    job: name.clone(),
                    cause,
                }
            }
        };
        let _ = self.events.send(event);

        if start_pending {
            debug!(job = %name, "Starting queued fire");
            self.dispatch(&name);
        }
    }

    /// The job registered under `name`, if it is still the registration that `generation`
    /// belongs to.
    fn current(&mut self, name: &str, generation: u64) -> Option<&mut ScheduledJob> {
        self.jobs
            .get_mut(name)
            .filter(|job| job.generation == generation)
    }

    fn missed(&self, name: &str, reason: MissedFireReason) {
        info!(job = %name, %reason, "Missed fire");
        let _ = self.events.send(SchedulerEvent::MissedFire {
            job: name.to_string(),
            reason,
        });
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
