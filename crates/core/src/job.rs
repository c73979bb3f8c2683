//! The job record and its lifecycle status.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::envelope::StatusEnvelope;
use crate::error::{DomainError, DomainResult};
use crate::id::JobId;

/// Attempt ceiling used when a producer does not specify one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Job execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Queued, waiting to be claimed
    Pending,
    /// Claimed by a worker and leased
    Running,
    /// Completed successfully (terminal)
    Successful,
    /// Exhausted its attempts (terminal)
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Successful,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Successful => "SUCCESSFUL",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Successful | JobStatus::Failed)
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::UnknownStatus(s.to_string()))
    }
}

/// A request to enqueue a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub job_type: String,
    pub payload: serde_json::Value,
    pub max_attempts: u32,
}

impl NewJob {
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Check the request before it reaches a store.
    pub fn validate(&self) -> DomainResult<()> {
        if self.job_type.trim().is_empty() {
            return Err(DomainError::validation("job type must not be empty"));
        }
        if self.max_attempts == 0 {
            return Err(DomainError::validation("max_attempts must be at least 1"));
        }
        Ok(())
    }
}

/// A job and its execution record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Work kind; interpreted only by the executor.
    #[serde(rename = "type")]
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    /// Completed execution attempts (success or failure).
    ///
    /// A lease expiry also counts as an attempt, and one that leaves
    /// `attempts == max_attempts` still requeues. `max_attempts` therefore
    /// limits retries rather than capping this counter: the run after such a
    /// requeue can fail with `attempts == max_attempts + 1`.
    pub attempts: u32,
    pub max_attempts: u32,
    /// Last failure message; cleared on success.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Lease anchor while `RUNNING`.
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build the `PENDING` record for a freshly enqueued job.
    pub fn pending(id: JobId, new_job: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id,
            job_type: new_job.job_type,
            payload: new_job.payload,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: new_job.max_attempts,
            error: None,
            created_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    /// Whether the lease held by a `RUNNING` job started strictly before `cutoff`.
    pub fn lease_expired(&self, cutoff: DateTime<Utc>) -> bool {
        self.status == JobStatus::Running && self.started_at.is_some_and(|at| at < cutoff)
    }

    pub fn envelope(&self) -> StatusEnvelope {
        StatusEnvelope {
            job_id: self.id,
            status: self.status,
            attempts: self.attempts,
            error: self.error.clone(),
        }
    }
}
