//! The OpenAI-compatible inference dispatcher (SPEC_FULL.md §4.6).
//!
//! Thin per-route handlers extract an optional `{backend}` path segment and
//! delegate to [`dispatch`], which resolves the backend, looks up the model,
//! gates on installation, admits the request to the loader, and reverse-
//! proxies it to the live runner.

use axum::extract::{Path, Request, State};
use axum::response::{IntoResponse, Response};
use http_body_util::{BodyExt, Full};
use slab_core::{Mode, RuntimeError, RunnerKey, UnloadRequest};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::ServerError;
use crate::routes::DispatchInfo;
use crate::state::AppState;

pub async fn chat_completions(State(state): State<AppState>, req: Request) -> Result<Response, ServerError> {
    dispatch(state, None, Mode::Completion, req).await
}

pub async fn chat_completions_for_backend(
    State(state): State<AppState>,
    Path(backend): Path<String>,
    req: Request,
) -> Result<Response, ServerError> {
    dispatch(state, Some(backend), Mode::Completion, req).await
}

pub async fn embeddings(State(state): State<AppState>, req: Request) -> Result<Response, ServerError> {
    dispatch(state, None, Mode::Embedding, req).await
}

pub async fn embeddings_for_backend(
    State(state): State<AppState>,
    Path(backend): Path<String>,
    req: Request,
) -> Result<Response, ServerError> {
    dispatch(state, Some(backend), Mode::Embedding, req).await
}

pub async fn reranking(State(state): State<AppState>, req: Request) -> Result<Response, ServerError> {
    dispatch(state, None, Mode::Reranking, req).await
}

pub async fn reranking_for_backend(
    State(state): State<AppState>,
    Path(backend): Path<String>,
    req: Request,
) -> Result<Response, ServerError> {
    dispatch(state, Some(backend), Mode::Reranking, req).await
}

pub async fn image_generation(State(state): State<AppState>, req: Request) -> Result<Response, ServerError> {
    dispatch(state, None, Mode::ImageGeneration, req).await
}

pub async fn image_generation_for_backend(
    State(state): State<AppState>,
    Path(backend): Path<String>,
    req: Request,
) -> Result<Response, ServerError> {
    dispatch(state, Some(backend), Mode::ImageGeneration, req).await
}

/// The shared §4.6 request path, independent of which route it arrived on.
async fn dispatch(
    state: AppState,
    requested_backend: Option<String>,
    mode: Mode,
    req: Request,
) -> Result<Response, ServerError> {
    let (parts, body) = req.into_parts();
    let body_bytes = body
        .collect()
        .await
        .map_err(|err| ServerError::Internal(format!("reading request body: {err}")))?
        .to_bytes();

    if body_bytes.len() > state.config.max_body_bytes {
        return Err(ServerError::RequestTooLarge);
    }

    let payload: serde_json::Value = serde_json::from_slice(&body_bytes)
        .map_err(|err| ServerError::BadRequest(format!("invalid JSON body: {err}")))?;
    let model_ref = payload
        .get("model")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ServerError::BadRequest("missing or empty \"model\" field".to_owned()))?
        .to_owned();

    let backend_name = requested_backend.unwrap_or_else(|| state.config.default_backend.clone());
    let mut backend = state.registry.get(&backend_name)?;
    let mut backend_name = backend_name;

    let model_id = if backend.uses_external_model_management() {
        model_ref.clone()
    } else {
        let record = state.model_manager.get_local(&model_ref).await?;

        let tracker = state.tracker.clone();
        let track_ref = model_ref.clone();
        tokio::spawn(async move { tracker.track_usage(&track_ref).await });

        let selected = state.selector.select(&backend_name, record.format, mode);
        if selected != backend_name {
            backend = state.registry.get(&selected)?;
            backend_name = selected;
        }
        record.id
    };

    let cancel = CancellationToken::new();
    state.installer.wait(&backend_name, &cancel).await?;

    let mut config = state.configurator.get(&backend_name, &model_ref);
    if config.keep_alive.is_none() {
        config.keep_alive = Some(state.config.default_keep_alive());
    }
    let mode = config.mode.unwrap_or(mode);
    let key = RunnerKey {
        backend: backend_name.clone(),
        model_id: model_id.clone(),
        mode,
    };

    let lease = state
        .loader
        .load(backend, key.clone(), model_ref.clone(), config, &cancel)
        .await?;

    let outbound = axum::http::Request::from_parts(parts, Full::new(body_bytes));
    let upstream = lease.runner().proxy(outbound).await;

    let mut response = match upstream {
        Ok(resp) => resp.map(axum::body::Body::new).into_response(),
        Err(err) => {
            if lease.runner().is_done() {
                warn!(
                    backend = %backend_name,
                    model_id = %model_id,
                    "backend runner exited mid-request, tearing down"
                );
                let loader = state.loader.clone();
                let teardown_backend = backend_name.clone();
                let teardown_model = model_id.clone();
                tokio::spawn(async move {
                    loader
                        .unload(UnloadRequest {
                            backend: Some(teardown_backend),
                            models: Some(vec![teardown_model]),
                            force: true,
                        })
                        .await;
                });
                return Err(ServerError::Runtime(RuntimeError::BackendTerminated { key }));
            }
            return Err(ServerError::from(err));
        }
    };

    response.extensions_mut().insert(DispatchInfo {
        model: Some(model_ref),
        backend: Some(backend_name),
    });

    Ok(response)
}
