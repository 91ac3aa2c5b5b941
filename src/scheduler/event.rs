use std::fmt;

/// Why a fire did not start a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissedFireReason {
    /// Skip-if-running policy and the job was running.
    Skipped,
    /// Queue policy and a fire was already pending.
    QueueFull,
    /// The executor rejected the run.
    Overloaded,
}

impl fmt::Display for MissedFireReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            MissedFireReason::Skipped => "skipped",
            MissedFireReason::QueueFull => "queue_full",
            MissedFireReason::Overloaded => "overloaded",
        };
        f.write_str(reason)
    }
}

/// Broadcast to every subscriber of the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    Started { job: String },
    Completed { job: String },
    JobFailed { job: String, cause: String },
    MissedFire { job: String, reason: MissedFireReason },
}

impl SchedulerEvent {
    pub fn job(&self) -> &str {
        match self {
            SchedulerEvent::Started { job }
            | SchedulerEvent::Completed { job }
            | SchedulerEvent::JobFailed { job, .. }
            | SchedulerEvent::MissedFire { job, .. } => job,
        }
    }
}

/// Observable state of a registered job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    /// Fired and handed to the executor, still waiting for a worker.
    Triggered { pending: bool },
    /// `runs` is above one only under the run-concurrently policy.
    Running { runs: usize, pending: bool },
}
