//! The job state machine.
//!
//! | From    | Event                            | To         |
//! |---------|----------------------------------|------------|
//! | PENDING | claim                            | RUNNING    |
//! | RUNNING | succeed                          | SUCCESSFUL |
//! | RUNNING | fail, attempts + 1 < max         | PENDING    |
//! | RUNNING | fail, attempts + 1 >= max        | FAILED     |
//! | RUNNING | lease expired, attempts < max    | PENDING    |
//! | RUNNING | lease expired, attempts >= max   | FAILED     |
//!
//! Stores that cannot run this function inside their own transaction (SQL) must
//! encode the same table; the in-memory store calls it directly.

use chrono::{DateTime, Utc};

use crate::error::{DomainError, DomainResult};
use crate::job::{Job, JobStatus};

/// Something that happens to a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    Claim,
    Succeed,
    Fail(String),
    LeaseExpired,
}

impl JobEvent {
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::Claim => "claim",
            JobEvent::Succeed => "complete-success",
            JobEvent::Fail(_) => "complete-failure",
            JobEvent::LeaseExpired => "lease-expired",
        }
    }
}

impl Job {
    /// Apply `event` at time `now`, returning the next record.
    ///
    /// `self` is left untouched so callers can discard the result when the
    /// surrounding transaction does not commit.
    pub fn apply(&self, event: JobEvent, now: DateTime<Utc>) -> DomainResult<Job> {
        let mut next = self.clone();

        match (self.status, event) {
            (JobStatus::Pending, JobEvent::Claim) => {
                next.status = JobStatus::Running;
                next.started_at = Some(now);
            }
            (JobStatus::Running, JobEvent::Succeed) => {
                next.status = JobStatus::Successful;
                next.attempts += 1;
                next.finished_at = Some(now);
                next.error = None;
            }
            (JobStatus::Running, JobEvent::Fail(message)) => {
                next.attempts += 1;
                next.error = Some(message);
                if next.attempts < next.max_attempts {
                    next.status = JobStatus::Pending;
                    next.started_at = None;
                } else {
                    next.status = JobStatus::Failed;
                    next.finished_at = Some(now);
                }
            }
            (JobStatus::Running, JobEvent::LeaseExpired) => {
                if self.attempts < self.max_attempts {
                    next.status = JobStatus::Pending;
                    next.attempts += 1;
                    next.started_at = None;
                } else {
                    next.status = JobStatus::Failed;
                    next.finished_at = Some(now);
                }
            }
            (from, event) => {
                return Err(DomainError::InvalidTransition {
                    from,
                    event: event.name(),
                });
            }
        }

        Ok(next)
    }
}
