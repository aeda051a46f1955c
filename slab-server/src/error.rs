//! Unified server error type — the HTTP-boundary policy layer (SPEC_FULL.md §7, §10.2).
//!
//! Internal components (installer, loader, selector, configurator) return
//! [`slab_core::RuntimeError`]; this is the *only* place that maps those to
//! HTTP status codes. Every handler returns `Result<T, ServerError>`, which
//! implements [`axum::response::IntoResponse`] so errors are automatically
//! converted to a JSON-body HTTP response with an appropriate status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use slab_core::RuntimeError;
use thiserror::Error;

/// All errors that can occur in the slab-server request lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Propagated from slab-core's scheduling runtime; mapped per §7.
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// The submitted request body exceeded the configured size cap.
    #[error("request too large")]
    RequestTooLarge,

    /// The request body was not valid JSON, or was missing a required field.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The caller referenced a resource that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An unclassified internal server error (encode/decode of
    /// server-managed structures, per §7's `Internal` category).
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::RequestTooLarge => {
                (StatusCode::BAD_REQUEST, "request too large".to_owned())
            }
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ServerError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
            ServerError::Runtime(e) => (runtime_error_status(e), e.to_string()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// The §7 error-taxonomy mapping from [`RuntimeError`] to an HTTP status.
fn runtime_error_status(err: &RuntimeError) -> StatusCode {
    match err {
        RuntimeError::BackendNotFound { .. } => StatusCode::NOT_FOUND,
        RuntimeError::ModelNotFound { .. } => StatusCode::NOT_FOUND,
        RuntimeError::InstallerNotStarted => StatusCode::SERVICE_UNAVAILABLE,
        RuntimeError::BackendNotInstalled { .. } => StatusCode::PRECONDITION_FAILED,
        RuntimeError::RunnerAlreadyActive { .. } => StatusCode::CONFLICT,
        RuntimeError::FlagNotAllowed { .. } => StatusCode::BAD_REQUEST,
        RuntimeError::FlagContainsPath { .. } => StatusCode::BAD_REQUEST,
        RuntimeError::BackendNotReadyInTime { .. } => StatusCode::SERVICE_UNAVAILABLE,
        RuntimeError::BackendTerminated { .. } => StatusCode::BAD_GATEWAY,
        RuntimeError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        RuntimeError::RequestTooLarge { .. } => StatusCode::BAD_REQUEST,
        RuntimeError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
        RuntimeError::NoSlotAvailable => StatusCode::SERVICE_UNAVAILABLE,
        RuntimeError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(e: anyhow::Error) -> Self {
        ServerError::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_model_not_found_to_404() {
        let status = runtime_error_status(&RuntimeError::ModelNotFound {
            model_ref: "m1".to_owned(),
        });
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn maps_runner_already_active_to_409() {
        let status = runtime_error_status(&RuntimeError::RunnerAlreadyActive {
            backend: "llama-cpp".to_owned(),
            model_id: "m1".to_owned(),
        });
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[test]
    fn maps_backend_not_installed_to_412() {
        let status = runtime_error_status(&RuntimeError::BackendNotInstalled {
            name: "vllm".to_owned(),
            message: "disk quota exceeded".to_owned(),
        });
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    }

    #[test]
    fn maps_not_ready_in_time_to_503() {
        let status = runtime_error_status(&RuntimeError::BackendNotReadyInTime {
            key: slab_core::RunnerKey {
                backend: "llama-cpp".to_owned(),
                model_id: "m1".to_owned(),
                mode: slab_core::Mode::Completion,
            },
        });
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
