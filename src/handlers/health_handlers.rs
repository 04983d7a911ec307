//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the record store is reachable

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Very small liveness probe. Always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that requests the record store's root endpoint with the
/// configured credentials. HTTP 200 when it answers successfully, HTTP 503
/// otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let store_check = match state.client.server_info().await {
        Ok(()) => CheckStatus {
            ok: true,
            upstream_status: None,
            error: None,
        },
        Err(e) => CheckStatus {
            ok: false,
            upstream_status: e.status().map(|s| s.as_u16()),
            error: Some(e.to_string()),
        },
    };
    let overall_ok = store_check.ok;

    let mut checks = HashMap::new();
    checks.insert("record_store", store_check);

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    upstream_status: Option<u16>,
    error: Option<String>,
}
