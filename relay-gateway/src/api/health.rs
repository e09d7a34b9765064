//! Health endpoints.
//!
//! `/alivez` and `/readyz` both answer `200 ok`. The gateway is ready as
//! soon as it serves: stream creation happens before the router is built,
//! and a lost broker surfaces per-session rather than process-wide.

use axum::{Router, response::IntoResponse, routing::get};
use http::StatusCode;

/// Create a router containing the health endpoints.
pub(crate) fn routes() -> Router {
    Router::new()
        .route("/alivez", get(health))
        .route("/readyz", get(health))
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
