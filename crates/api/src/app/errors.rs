use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use jobqueue_core::JobId;
use jobqueue_infra::jobs::JobStoreError;

pub fn store_error_to_response(err: JobStoreError) -> axum::response::Response {
    match err {
        JobStoreError::InvalidInput(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_job", msg),
        JobStoreError::Transient(msg) => {
            tracing::error!(error = %msg, "job store request failed");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "store_error",
                "job store unavailable",
            )
        }
    }
}

pub fn job_not_found() -> axum::response::Response {
    json_error(StatusCode::NOT_FOUND, "not_found", "Job not found")
}

pub fn parse_job_id(raw: &str) -> Result<JobId, axum::response::Response> {
    raw.parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id"))
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
