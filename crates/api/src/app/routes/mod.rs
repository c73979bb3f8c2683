use axum::Router;

pub mod jobs;
pub mod observers;
pub mod system;

/// Router for the `/api` tree.
pub fn router() -> Router {
    Router::new().nest("/jobs", jobs::router())
}
