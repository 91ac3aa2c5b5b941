use super::{ConcurrencyPolicy, Job, JobState, SchedulerError, Trigger};
use crate::executor::TaskError;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

/// One-shot response channel used by the coordinator.
pub type Response<T> = oneshot::Sender<Result<T, SchedulerError>>;

/// Messages processed sequentially by the coordinator task.
pub enum SchedulerRequest {
    Register {
        name: String,
        trigger: Trigger,
        policy: ConcurrencyPolicy,
        job: Arc<dyn Job>,
        respond_to: Response<()>,
    },
    Unregister {
        name: String,
        respond_to: Response<()>,
    },
    State {
        name: String,
        respond_to: Response<JobState>,
    },
    /// Sent by a job body's wrapper when a worker picks the run up.
    Started { name: String, generation: u64 },
    /// Sent by a job body's wrapper once the run is over.
    Finished {
        name: String,
        generation: u64,
        outcome: Result<(), TaskError>,
    },
    Shutdown {
        respond_to: Response<()>,
    },
}

impl fmt::Debug for SchedulerRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerRequest::Register {
                name,
                trigger,
                policy,
                ..
            } => f
                .debug_struct("Register")
                .field("name", name)
                .field("trigger", trigger)
                .field("policy", policy)
                .finish_non_exhaustive(),
            SchedulerRequest::Unregister { name, .. } => {
                f.debug_struct("Unregister").field("name", name).finish_non_exhaustive()
            }
            SchedulerRequest::State { name, .. } => {
                f.debug_struct("State").field("name", name).finish_non_exhaustive()
            }
            SchedulerRequest::Started { name, generation } => f
                .debug_struct("Started")
                .field("name", name)
                .field("generation", generation)
                .finish(),
            SchedulerRequest::Finished {
                name,
                generation,
                outcome,
            } => f
                .debug_struct("Finished")
                .field("name", name)
                .field("generation", generation)
                .field("outcome", outcome)
                .finish(),
            SchedulerRequest::Shutdown { .. } => f.debug_struct("Shutdown").finish_non_exhaustive(),
        }
    }
}
