//! When a job fires.
//!
//! Fixed-rate and fixed-delay triggers fire once at registration (or after their
//! initial delay). Cron expressions use the seconds-resolution syntax of the `cron`
//! crate and are evaluated in the timezone of the published process environment, so
//! `0 0 2 * * *` means 02:00 in Algiers, not on the host clock.

use super::SchedulerError;
use crate::config::{JobConfig, TriggerConfig};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub enum Trigger {
    /// Every `period`, anchored on the first fire. Deadlines that pass while the
    /// coordinator is behind are skipped rather than fired in a burst.
    FixedRate {
        period: Duration,
        initial_delay: Duration,
    },
    /// `delay` after the previous run completes.
    FixedDelay {
        delay: Duration,
        initial_delay: Duration,
    },
    Cron(Box<Schedule>),
}

impl Trigger {
    pub fn fixed_rate(period: Duration) -> Self {
        Trigger::FixedRate {
            period,
            initial_delay: Duration::ZERO,
        }
    }

    pub fn fixed_delay(delay: Duration) -> Self {
        Trigger::FixedDelay {
            delay,
            initial_delay: Duration::ZERO,
        }
    }

    pub fn cron(expression: &str) -> Result<Self, SchedulerError> {
        let schedule = Schedule::from_str(expression).map_err(|e| SchedulerError::InvalidTrigger {
            job: String::new(),
            reason: format!("{expression:?}: {e}"),
        })?;
        Ok(Trigger::Cron(Box::new(schedule)))
    }

    /// Delays the first fire. Has no effect on cron triggers.
    pub fn with_initial_delay(self, delay: Duration) -> Self {
        match self {
            Trigger::FixedRate { period, .. } => Trigger::FixedRate {
                period,
                initial_delay: delay,
            },
            Trigger::FixedDelay { delay: every, .. } => Trigger::FixedDelay {
                delay: every,
                initial_delay: delay,
            },
            cron @ Trigger::Cron(_) => cron,
        }
    }

    pub fn from_config(job: &str, config: &JobConfig) -> Result<Self, SchedulerError> {
        let trigger = match &config.trigger {
            TriggerConfig::FixedRate(period) => Trigger::fixed_rate(*period),
            TriggerConfig::FixedDelay(delay) => Trigger::fixed_delay(*delay),
            TriggerConfig::Cron(expression) => {
                Trigger::cron(expression).map_err(|e| match e {
                    SchedulerError::InvalidTrigger { reason, .. } => SchedulerError::InvalidTrigger {
                        job: job.to_string(),
                        reason,
                    },
                    other => other,
                })?
            }
        };
        if config.initial_delay.is_some() && matches!(trigger, Trigger::Cron(_)) {
            return Err(SchedulerError::InvalidTrigger {
                job: job.to_string(),
                reason: "initial_delay is not supported with a cron trigger".to_string(),
            });
        }
        let trigger = match config.initial_delay {
            Some(delay) => trigger.with_initial_delay(delay),
            None => trigger,
        };
        trigger.validate(job)?;
        Ok(trigger)
    }

    pub(crate) fn validate(&self, job: &str) -> Result<(), SchedulerError> {
        match self {
            Trigger::FixedRate { period, .. } if period.is_zero() => {
                Err(SchedulerError::InvalidTrigger {
                    job: job.to_string(),
                    reason: "fixed-rate period must be positive".to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Next cron fire strictly after `after`, in the zone of `after`.
    pub fn next_cron_after(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        match self {
            Trigger::Cron(schedule) => schedule.after(after).next(),
            _ => None,
        }
    }

    /// First deadline of a freshly registered job.
    pub(crate) fn first_deadline(&self, now: Instant, timezone: Tz) -> Option<Deadline> {
        match self {
            Trigger::FixedRate { initial_delay, .. } | Trigger::FixedDelay { initial_delay, .. } => {
                Some(Deadline::at(now + *initial_delay))
            }
            Trigger::Cron(_) => self.next_cron_deadline(None, now, timezone),
        }
    }

    /// Deadline following a fire that was due at `fired`. Fixed-delay triggers have
    /// none until their run completes.
    pub(crate) fn deadline_after_fire(
        &self,
        fired: &Deadline,
        now: Instant,
        timezone: Tz,
    ) -> Option<Deadline> {
        match self {
            Trigger::FixedRate { period, .. } => {
                let mut next = fired.at + *period;
                while next <= now {
                    next += *period;
                }
                Some(Deadline::at(next))
            }
            Trigger::FixedDelay { .. } => None,
            Trigger::Cron(_) => self.next_cron_deadline(fired.occurrence.as_ref(), now, timezone),
        }
    }

    /// Deadline following a completed run of a fixed-delay job.
    pub(crate) fn deadline_after_completion(&self, now: Instant) -> Option<Deadline> {
        match self {
            Trigger::FixedDelay { delay, .. } => Some(Deadline::at(now + *delay)),
            _ => None,
        }
    }

    fn next_cron_deadline(
        &self,
        previous: Option<&DateTime<Tz>>,
        now: Instant,
        timezone: Tz,
    ) -> Option<Deadline> {
        let wall = Utc::now().with_timezone(&timezone);
        // A timer that wakes slightly early must not fire the same occurrence twice.
        let after = match previous {
            Some(previous) if *previous > wall => *previous,
            _ => wall,
        };
        let next = self.next_cron_after(&after)?;
        let wait = (next - wall).to_std().unwrap_or(Duration::ZERO);
        Some(Deadline {
            at: now + wait,
            occurrence: Some(next),
        })
    }
}

/// A pending fire. Cron deadlines remember the wall-clock occurrence they stand for.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Deadline {
    pub(crate) at: Instant,
    occurrence: Option<DateTime<Tz>>,
}

impl Deadline {
    fn at(at: Instant) -> Self {
        Self {
            at,
            occurrence: None,
        }
    }
}
