//! The typed error taxonomy shared by every component of the scheduling core.
//!
//! Internal components (installer, loader, selector, configurator) return
//! [`RuntimeError`]; the HTTP layer is the sole place that maps these to
//! status codes (see `slab_server::error::ServerError`).

use thiserror::Error;

use crate::runner::RunnerKey;

/// Errors produced by the runtime layer.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// The named backend was never registered with the core.
    #[error("backend not found: {name}")]
    BackendNotFound { name: String },

    /// The model manager could not locate the referenced model.
    #[error("model not found: {model_ref}")]
    ModelNotFound { model_ref: String },

    /// The installer's startup run loop has not been started yet.
    #[error("installer not started")]
    InstallerNotStarted,

    /// Installation failed and on-demand retry is not possible right now.
    #[error("backend {name} is not installed: {message}")]
    BackendNotInstalled { name: String, message: String },

    /// A reconfigure request targeted a model with an actively-leased runner.
    #[error("runner already active for model {model_id} on backend {backend}")]
    RunnerAlreadyActive { backend: String, model_id: String },

    /// A runtime flag was not present in the backend's allowlist.
    #[error("runtime flag not allowed for backend {backend}: {flag}")]
    FlagNotAllowed { backend: String, flag: String },

    /// A runtime flag or its value contained a path separator.
    #[error("runtime flag contains a path separator: {flag}")]
    FlagContainsPath { flag: String },

    /// The readiness protocol exhausted its probe budget.
    #[error("backend did not become ready in time: {key:?}")]
    BackendNotReadyInTime { key: RunnerKey },

    /// The backend subprocess exited (or crashed) while leases were held.
    #[error("backend subprocess terminated unexpectedly: {key:?}")]
    BackendTerminated { key: RunnerKey },

    /// The caller's context was cancelled while waiting on a suspension point.
    #[error("operation cancelled")]
    Cancelled,

    /// The submitted request body exceeded the configured size cap.
    #[error("request too large ({size} bytes; maximum is {max} bytes)")]
    RequestTooLarge { size: usize, max: usize },

    /// The request body was not valid JSON, or was missing a required field.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// The loader's slot pool is fully occupied by active runners and no
    /// idle victim is available within the caller's deadline.
    #[error("no slot available")]
    NoSlotAvailable,

    /// An unclassified internal error (serialization, I/O, etc).
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl RuntimeError {
    /// `true` for errors that a caller may usefully retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RuntimeError::Cancelled
                | RuntimeError::NoSlotAvailable
                | RuntimeError::BackendNotReadyInTime { .. }
                | RuntimeError::BackendTerminated { .. }
        )
    }
}
