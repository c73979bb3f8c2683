//! Observer wire protocol.
//!
//! Client → server:
//!
//! ```json
//! {"action": "subscribe", "jobId": 42}
//! {"action": "unsubscribe", "jobId": "42"}
//! ```
//!
//! Server → client: a confirmation `{"message": "Subscribed to job 42"}`, then
//! status envelopes `{"jobId": 42, "status": "RUNNING", "attempts": 0, "error": null}`.

use serde::{Deserialize, Serialize};

use jobqueue_core::id::{self, JobId};
use jobqueue_core::StatusEnvelope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe {
        #[serde(rename = "jobId", deserialize_with = "id::lenient")]
        job_id: JobId,
    },
    Unsubscribe {
        #[serde(rename = "jobId", deserialize_with = "id::lenient")]
        job_id: JobId,
    },
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    pub fn job_id(&self) -> JobId {
        match self {
            ClientMessage::Subscribe { job_id } | ClientMessage::Unsubscribe { job_id } => *job_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Confirmation { message: String },
    Status(StatusEnvelope),
}

impl ServerMessage {
    pub fn subscribed(job_id: JobId) -> Self {
        ServerMessage::Confirmation {
            message: format!("Subscribed to job {job_id}"),
        }
    }

    pub fn unsubscribed(job_id: JobId) -> Self {
        ServerMessage::Confirmation {
            message: format!("Unsubscribed from job {job_id}"),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<StatusEnvelope> for ServerMessage {
    fn from(envelope: StatusEnvelope) -> Self {
        ServerMessage::Status(envelope)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed subscription message: {0}")]
    Malformed(String),
    #[error("session is closed")]
    SessionClosed,
}
