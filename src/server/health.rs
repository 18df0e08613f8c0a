//! Liveness endpoint.

use axum::Json;
use axum::http::StatusCode;
use serde::Serialize;

/// Body of `GET /health`.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
}

/// Returns 200 with the running version while the server accepts connections.
pub async fn health_handler() -> (StatusCode, Json<Health>) {
    (
        StatusCode::OK,
        Json(Health {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}
