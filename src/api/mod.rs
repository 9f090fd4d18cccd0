//! Operator control surface, read API and live event stream, nested under `/api`

pub mod handlers;
pub mod models;

use crate::proxy::exchange::ExchangeEngine;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

pub use handlers::ApiError;

pub fn router() -> Router<Arc<ExchangeEngine>> {
    Router::new()
        .route("/requests", get(handlers::list_requests))
        .route("/requests/{id}", get(handlers::get_request))
        .route("/requests/{id}/approve", post(handlers::approve_request))
        .route("/requests/{id}/override", post(handlers::override_request))
        .route("/files/{*path}", get(handlers::get_file))
        .route("/events", get(handlers::events))
        .route("/stats", get(handlers::stats))
        .route("/override/toggle", post(handlers::toggle_override))
        .route("/override/status", get(handlers::override_status))
        .route("/override/pending", get(handlers::pending_approvals))
}
