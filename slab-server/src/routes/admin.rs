//! Admin/introspection routes nested under `<p>` (SPEC_FULL.md §4.6, §4.7, §6, §10.5).

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use slab_core::{KeepAlive, Mode, ModelConfig, UnloadRequest};

use crate::error::ServerError;
use crate::state::AppState;

/// `GET <p>/status` → `{ backendName: statusString }`.
pub async fn status(State(state): State<AppState>) -> Response {
    let statuses: serde_json::Map<String, serde_json::Value> = state
        .registry
        .iter()
        .map(|b| (b.name().to_owned(), json!(b.status())))
        .collect();
    Json(serde_json::Value::Object(statuses)).into_response()
}

/// `GET <p>/ps` → list of live runners.
pub async fn ps(State(state): State<AppState>) -> Response {
    let rows: Vec<_> = state
        .loader
        .ps()
        .into_iter()
        .map(|r| {
            json!({
                "modelName": r.model_name,
                "backendName": r.backend_name,
                "mode": r.mode,
                "keepAlive": r.keep_alive,
                "inUse": r.in_use,
                "idleForMs": r.idle_for.map(|d| d.as_millis() as u64),
            })
        })
        .collect();
    Json(rows).into_response()
}

/// `GET <p>/df` → disk usage for models and backend installations.
pub async fn df(State(state): State<AppState>) -> Result<Response, ServerError> {
    let models_disk_usage = state.model_manager.get_disk_usage().await?;

    let mut backend_disk_usage = 0i64;
    for backend in state.registry.iter() {
        backend_disk_usage += backend.get_disk_usage().await?;
    }

    Ok(Json(json!({
        "modelsDiskUsage": models_disk_usage,
        "backendDiskUsage": backend_disk_usage,
    }))
    .into_response())
}

#[derive(Debug, Deserialize, Default)]
pub struct UnloadBody {
    pub backend: Option<String>,
    pub models: Option<Vec<String>>,
    #[serde(default)]
    pub force: bool,
}

/// `POST <p>/unload` → `{ unloadedRunners: N }`.
pub async fn unload(
    State(state): State<AppState>,
    Json(body): Json<UnloadBody>,
) -> Response {
    let count = state
        .loader
        .unload(UnloadRequest {
            backend: body.backend,
            models: body.models,
            force: body.force,
        })
        .await;
    Json(json!({ "unloadedRunners": count })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct ConfigureBody {
    pub model: String,
    #[serde(default)]
    pub context_size: Option<i64>,
    #[serde(default)]
    pub runtime_flags: Vec<String>,
    #[serde(default)]
    pub keep_alive: Option<KeepAlive>,
    #[serde(default)]
    pub mode: Option<Mode>,
    #[serde(default)]
    pub speculative: Option<slab_core::configurator::SpeculativeConfig>,
    #[serde(default)]
    pub llama_cpp: Option<slab_core::configurator::LlamaCppConfig>,
    #[serde(default)]
    pub vllm: Option<slab_core::configurator::VllmConfig>,
    #[serde(default)]
    pub disable_loader_memory_check: bool,
}

/// `POST <p>/_configure` — configure the default backend's model.
pub async fn configure(
    State(state): State<AppState>,
    Json(body): Json<ConfigureBody>,
) -> Result<Response, ServerError> {
    let backend = state.config.default_backend.clone();
    do_configure(state, backend, body).await
}

/// `POST <p>/{backend}/_configure` — configure a named backend's model.
pub async fn configure_for_backend(
    State(state): State<AppState>,
    Path(backend): Path<String>,
    Json(body): Json<ConfigureBody>,
) -> Result<Response, ServerError> {
    do_configure(state, backend, body).await
}

async fn do_configure(
    state: AppState,
    backend: String,
    body: ConfigureBody,
) -> Result<Response, ServerError> {
    let backend_handle = state.registry.get(&backend)?;
    let model_id = if backend_handle.uses_external_model_management() {
        body.model.clone()
    } else {
        state.model_manager.resolve_id(&body.model).await?
    };

    let config = ModelConfig {
        context_size: body.context_size,
        runtime_flags: body.runtime_flags,
        keep_alive: body.keep_alive,
        mode: body.mode,
        speculative: body.speculative,
        llama_cpp: body.llama_cpp,
        vllm: body.vllm,
        disable_loader_memory_check: body.disable_loader_memory_check,
        extra_flags: Default::default(),
    };

    state
        .configurator
        .set(&state.loader, &backend, &model_id, &body.model, config)?;

    Ok((axum::http::StatusCode::ACCEPTED, Json(json!({ "accepted": true }))).into_response())
}

/// `GET <p>/requests` — recent request/response records.
pub async fn requests(State(state): State<AppState>) -> Response {
    Json(state.recorder.snapshot()).into_response()
}
