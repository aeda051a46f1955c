//! The `ModelManager` capability consumed by the core.
//!
//! The model distribution/registry/storage layer (pull, push, tag, blob I/O,
//! on-disk store layout) lives outside this crate entirely; the core only
//! ever calls through this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

/// Opaque model identifier as resolved by the model manager (typically a
/// content digest). Distinct from the human-typed [`ModelRef`].
pub type ModelId = String;

/// A model reference as typed by a client, e.g. `"qwen2.5:7b"`.
pub type ModelRef = String;

/// The on-disk weight format of a model, used by the [`crate::selector::Selector`]
/// to decide which backend can serve it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelFormat {
    Gguf,
    Safetensors,
    Dduf,
    Other,
}

/// A resolved local model, as returned by [`ModelManager::get_local`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    pub id: ModelId,
    pub model_ref: ModelRef,
    pub format: ModelFormat,
}

/// A located bundle of files backing a model (weights, tokenizer, etc).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBundle {
    pub id: ModelId,
    pub root: String,
    pub files: Vec<String>,
}

/// Capability the core requires of the model distribution layer.
///
/// Implementations live outside this crate (the registry/storage layer is
/// explicitly out of scope, see SPEC_FULL.md §1); this trait is the seam.
#[async_trait]
pub trait ModelManager: Send + Sync + 'static {
    /// Resolve a model reference to its locally-stored record.
    ///
    /// Returns [`RuntimeError::ModelNotFound`] if the model is not present
    /// locally (the dispatcher maps this to HTTP 404).
    async fn get_local(&self, model_ref: &str) -> Result<ModelRecord, RuntimeError>;

    /// Resolve a model reference to its stable [`ModelId`] without fetching
    /// the full record.
    async fn resolve_id(&self, model_ref: &str) -> Result<ModelId, RuntimeError>;

    /// Resolve a model reference to its on-disk bundle.
    async fn get_bundle(&self, model_ref: &str) -> Result<ModelBundle, RuntimeError>;

    /// Total bytes of local storage consumed by managed models.
    async fn get_disk_usage(&self) -> Result<i64, RuntimeError>;
}
