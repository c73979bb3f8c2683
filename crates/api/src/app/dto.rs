use serde::{Deserialize, Serialize};

use jobqueue_core::{Job, JobStatus, NewJob};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(default = "empty_payload")]
    pub payload: serde_json::Value,
    pub max_attempts: Option<u32>,
}

fn empty_payload() -> serde_json::Value {
    serde_json::json!({})
}

impl CreateJobRequest {
    pub fn into_new_job(self, default_max_attempts: u32) -> NewJob {
        NewJob::new(self.job_type, self.payload)
            .with_max_attempts(self.max_attempts.unwrap_or(default_max_attempts))
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct DeletedJobResponse {
    pub message: &'static str,
    pub job: Job,
}

impl DeletedJobResponse {
    pub fn new(job: Job) -> Self {
        Self {
            message: "Job deleted",
            job,
        }
    }
}
