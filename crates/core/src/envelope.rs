//! Messages that leave the store: change events, status envelopes and
//! operation outcomes.

use serde::{Deserialize, Serialize};

use crate::id::{self, JobId};
use crate::job::{Job, JobStatus};

/// Payload carried on the durable notification channel.
///
/// Only the id travels; listeners re-read the record so they never act on a
/// stale copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "jobId", deserialize_with = "id::lenient")]
    pub job_id: JobId,
}

impl ChangeEvent {
    pub fn new(job_id: JobId) -> Self {
        Self { job_id }
    }

    pub fn encode(&self) -> String {
        format!(r#"{{"jobId":{}}}"#, self.job_id)
    }

    pub fn decode(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

/// Minimal status view pushed to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEnvelope {
    pub job_id: JobId,
    pub status: JobStatus,
    pub attempts: u32,
    pub error: Option<String>,
}

/// Result of a guarded delete.
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    /// The job existed and was removed; carries the removed record.
    Deleted(Job),
    /// The job is `RUNNING` and was left in place.
    Running,
    NotFound,
}

/// Jobs resolved by one lease-recovery sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    /// Moved back to `PENDING`.
    pub requeued: Vec<Job>,
    /// Moved to `FAILED` because they had no attempts left.
    pub failed: Vec<Job>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.failed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requeued.len() + self.failed.len()
    }
}
