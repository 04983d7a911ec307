//! Defines routes for the upload page and probes.
//!
//! ## Structure
//! - `GET  /`         upload form plus the records of `?collection=`
//! - `POST /upload`   multipart form submission (collection, type, attachment)
//! - `GET  /healthz`  liveness
//! - `GET  /readyz`   record store reachability

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        ui_handlers::{index, upload},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Largest attachment the form accepts.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Build and return the router for the upload page.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/", get(index))
        .route(
            "/upload",
            post(upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
}
