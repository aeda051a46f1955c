//! `GET <p>[/{backend}]/v1/models[/{name...}]` — delegated to the model
//! manager (SPEC_FULL.md §4.6, §6).

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::ServerError;
use crate::state::AppState;

/// `GET <p>/v1/models` — no `name` was given.
///
/// The `ModelManager` capability this core consumes (SPEC_FULL.md §1) only
/// offers lookup by reference, not enumeration, so the collection endpoint
/// returns an empty OpenAI-shaped list rather than a real listing.
pub async fn list(State(_state): State<AppState>) -> Response {
    Json(json!({ "object": "list", "data": [] })).into_response()
}

pub async fn list_for_backend(
    State(state): State<AppState>,
    Path(_backend): Path<String>,
) -> Response {
    list(State(state)).await
}

pub async fn get_by_name(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ServerError> {
    get_model(state, name).await
}

pub async fn get_by_name_for_backend(
    State(state): State<AppState>,
    Path((_backend, name)): Path<(String, String)>,
) -> Result<Response, ServerError> {
    get_model(state, name).await
}

async fn get_model(state: AppState, name: String) -> Result<Response, ServerError> {
    let record = state.model_manager.get_local(&name).await?;
    Ok(Json(json!({
        "id": record.model_ref,
        "object": "model",
        "format": record.format,
    }))
    .into_response())
}
