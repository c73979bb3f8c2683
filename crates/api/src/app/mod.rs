//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store selection and background tasks (workers, sweeper, bridge)
//! - `routes/`: HTTP and WebSocket handlers
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs` and tests).
pub fn build_app(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .route("/ws", get(routes::observers::observe))
        .nest("/api", routes::router())
        .layer(Extension(services))
}
