//! Web server module for handling inbound webhooks.
//!
//! This module provides a thin web layer that:
//! - Receives Mailgun inbound-route webhooks at `/mailgun/incoming`
//! - Hands them to the relay core for verification and forwarding
//! - Answers `done` (or 401) once the forward has been attempted

pub mod handlers;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{health, mailgun_incoming, AppState, HealthResponse};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_body_bytes;

    Router::new()
        .route("/health", get(health))
        .route("/mailgun/incoming", post(mailgun_incoming))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
