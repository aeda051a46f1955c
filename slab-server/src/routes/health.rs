//! Liveness endpoint, independent of backend/model state.

use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub async fn get_health() -> Response {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response()
}
