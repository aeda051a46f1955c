//! Axum router construction.
//!
//! [`build`] assembles the complete application router, nesting every
//! inference and admin route under the configured `<p>` prefix
//! (SPEC_FULL.md §4.6, §6), and wraps it in:
//! - CORS (also answers every `OPTIONS` preflight with 204, independent of
//!   whether a route exists for that path — SPEC_FULL.md §10.5)
//! - Per-request trace-ID injection and recording

mod admin;
mod dispatch;
mod health;
mod models;

use axum::routing::{get, post};
use axum::Router;

use crate::middleware::cors::cors_layer;
use crate::middleware::TraceLayer;
use crate::state::AppState;

/// Stashed into response extensions by [`dispatch`] so the outer
/// [`TraceLayer`] can record which model/backend served a request without
/// threading that information through the middleware stack by hand.
#[derive(Debug, Clone, Default)]
pub(crate) struct DispatchInfo {
    pub model: Option<String>,
    pub backend: Option<String>,
}

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: AppState) -> Router {
    let prefix = state.config.inference_prefix.clone();

    let inference = Router::new()
        .route("/v1/chat/completions", post(dispatch::chat_completions))
        .route(
            "/{backend}/v1/chat/completions",
            post(dispatch::chat_completions_for_backend),
        )
        .route("/v1/completions", post(dispatch::chat_completions))
        .route(
            "/{backend}/v1/completions",
            post(dispatch::chat_completions_for_backend),
        )
        .route("/v1/embeddings", post(dispatch::embeddings))
        .route(
            "/{backend}/v1/embeddings",
            post(dispatch::embeddings_for_backend),
        )
        .route("/rerank", post(dispatch::reranking))
        .route("/{backend}/rerank", post(dispatch::reranking_for_backend))
        .route("/score", post(dispatch::reranking))
        .route("/{backend}/score", post(dispatch::reranking_for_backend))
        .route(
            "/v1/images/generations",
            post(dispatch::image_generation),
        )
        .route(
            "/{backend}/v1/images/generations",
            post(dispatch::image_generation_for_backend),
        )
        .route("/v1/images/edits", post(dispatch::image_generation))
        .route(
            "/{backend}/v1/images/edits",
            post(dispatch::image_generation_for_backend),
        )
        .route("/v1/models", get(models::list))
        .route("/{backend}/v1/models", get(models::list_for_backend))
        .route("/v1/models/{*name}", get(models::get_by_name))
        .route(
            "/{backend}/v1/models/{*name}",
            get(models::get_by_name_for_backend),
        );

    let admin = Router::new()
        .route("/status", get(admin::status))
        .route("/ps", get(admin::ps))
        .route("/df", get(admin::df))
        .route("/unload", post(admin::unload))
        .route("/_configure", post(admin::configure))
        .route("/{backend}/_configure", post(admin::configure_for_backend))
        .route("/requests", get(admin::requests));

    let api = Router::new()
        .merge(inference)
        .merge(admin)
        .route("/healthz", get(health::get_health));

    let app = if prefix.is_empty() || prefix == "/" {
        api
    } else {
        Router::new().nest(&prefix, api)
    };

    app.layer(TraceLayer::new(state.clone()))
        .layer(cors_layer(&state))
        .with_state(state)
}
