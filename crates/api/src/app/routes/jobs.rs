use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use tracing::info;

use jobqueue_core::DeleteOutcome;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_job))
        .route("/:id", get(get_job).delete(delete_job))
        .route("/:id/status", get(get_job_status))
}

pub async fn create_job(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::CreateJobRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            let message = rejection.body_text();
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", message);
        }
    };

    let new_job = body.into_new_job(services.queue.default_max_attempts);
    match services.store.enqueue(new_job).await {
        Ok(job) => {
            info!(job_id = %job.id, job_type = %job.job_type, "job enqueued");
            (StatusCode::CREATED, Json(job)).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match errors::parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.store.get_by_id(id).await {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => errors::job_not_found(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn get_job_status(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match errors::parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.store.get_status_by_id(id).await {
        Ok(Some(status)) => Json(dto::JobStatusResponse { status }).into_response(),
        Ok(None) => errors::job_not_found(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn delete_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match errors::parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.store.delete_by_id(id).await {
        Ok(DeleteOutcome::Deleted(job)) => {
            info!(job_id = %job.id, status = %job.status, "job deleted");
            Json(dto::DeletedJobResponse::new(job)).into_response()
        }
        Ok(DeleteOutcome::Running) => errors::json_error(
            StatusCode::BAD_REQUEST,
            "job_running",
            "Cannot delete a RUNNING job",
        ),
        Ok(DeleteOutcome::NotFound) => errors::job_not_found(),
        Err(e) => errors::store_error_to_response(e),
    }
}
