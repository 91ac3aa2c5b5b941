//! Error types for the scheduled task coordinator.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Job already registered: {0}")]
    DuplicateJob(String),

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Invalid trigger for job {job}: {reason}")]
    InvalidTrigger { job: String, reason: String },

    #[error("Scheduler closed")]
    Closed,

    #[error("Scheduler dropped response channel")]
    Dropped,
}
