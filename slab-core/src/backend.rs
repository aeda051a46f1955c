//! The `Backend` capability consumed by the core (SPEC_FULL.md §4.1).
//!
//! A backend is a pluggable inference engine driven as a child subprocess.
//! This crate never implements one — llama.cpp, vLLM, MLX, SGLang and
//! diffusers are all external collaborators; only the trait is owned here.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::configurator::ModelConfig;
use crate::error::RuntimeError;
use crate::mode::Mode;
use crate::model_manager::ModelId;

/// Where a [`Runner`](crate::runner::Runner) should bind a backend subprocess.
#[derive(Debug, Clone)]
pub enum BindTarget {
    /// A per-slot Unix-domain socket path.
    Uds(std::path::PathBuf),
    /// A loopback TCP port, for backends that cannot speak UDS.
    Tcp(std::net::SocketAddr),
}

/// Capability the core requires of any backend (SPEC_FULL.md §4.1).
///
/// Implementations must be cheap to clone (typically an `Arc`-wrapped inner
/// struct) since the registry hands out shared references across tasks.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Stable identifier; lowercase, usable as a path component and UDS
    /// filename.
    fn name(&self) -> &str;

    /// If `true`, the dispatcher skips the local model-store lookup — the
    /// backend manages its own models (e.g. a backend that only ever serves
    /// one fixed model).
    fn uses_external_model_management(&self) -> bool {
        false
    }

    /// If `true`, the runner allocates a loopback TCP port instead of a UDS
    /// path for this backend.
    fn uses_tcp(&self) -> bool {
        false
    }

    /// Whether installation for this backend should be deferred until first
    /// use rather than performed eagerly at startup.
    fn deferred(&self) -> bool {
        false
    }

    /// Install the backend. Idempotent: returns `Ok(())` immediately if
    /// already installed. Must be cancel-safe.
    async fn install(&self, cancel: CancellationToken) -> Result<(), RuntimeError>;

    /// Run one model on the given bind target until `cancel` fires or the
    /// subprocess exits on its own.
    ///
    /// Returns `Ok(())` on clean cancellation; any other outcome is a
    /// failure. Must not attempt internal restart — that is the loader's
    /// job.
    async fn run(
        &self,
        target: BindTarget,
        model_id: ModelId,
        model_ref: String,
        mode: Mode,
        config: ModelConfig,
        cancel: CancellationToken,
    ) -> Result<(), RuntimeError>;

    /// Current human-readable status string, for `GET <p>/status`.
    fn status(&self) -> String {
        "unknown".to_owned()
    }

    /// Bytes of local disk consumed by this backend's own installation
    /// (distinct from model storage, which is the `ModelManager`'s concern).
    async fn get_disk_usage(&self) -> Result<i64, RuntimeError> {
        Ok(0)
    }
}

/// Request body for `POST <p>/{backend}/_configure`, forwarded unparsed to
/// [`Backend::run`] as part of [`ModelConfig`].
pub type BackendFlags = HashMap<String, serde_json::Value>;

/// Immutable registry of backends, built once at startup.
///
/// Mirrors the "backend map and default backend are immutable after
/// construction" invariant from SPEC_FULL.md §5.
#[derive(Clone)]
pub struct BackendRegistry {
    backends: Arc<HashMap<String, Arc<dyn Backend>>>,
    default_backend: String,
}

impl BackendRegistry {
    /// Build a registry from a list of backends and the name of the default.
    ///
    /// # Panics
    ///
    /// Panics if `default_backend` does not match any entry in `backends` —
    /// this is a startup-configuration bug, not a runtime condition.
    pub fn new(backends: Vec<Arc<dyn Backend>>, default_backend: impl Into<String>) -> Self {
        let default_backend = default_backend.into();
        let map: HashMap<String, Arc<dyn Backend>> = backends
            .into_iter()
            .map(|b| (b.name().to_owned(), b))
            .collect();
        assert!(
            map.contains_key(&default_backend),
            "default backend {default_backend:?} was not registered"
        );
        Self {
            backends: Arc::new(map),
            default_backend,
        }
    }

    /// Look up a backend by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Backend>, RuntimeError> {
        self.backends
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::BackendNotFound {
                name: name.to_owned(),
            })
    }

    /// Name of the backend used when a route omits `{backend}`.
    pub fn default_backend(&self) -> &str {
        &self.default_backend
    }

    /// Iterate over all registered backends.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Backend>> {
        self.backends.values()
    }

    /// Whether a backend with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }
}

/// Platform descriptor consulted by the [`crate::selector::Selector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub os: PlatformOs,
    pub arch: PlatformArch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlatformOs {
    Linux,
    MacOs,
    Windows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlatformArch {
    X86_64,
    Arm64,
    Other,
}

impl Platform {
    /// The platform the process is actually running on.
    pub fn current() -> Self {
        let os = if cfg!(target_os = "linux") {
            PlatformOs::Linux
        } else if cfg!(target_os = "macos") {
            PlatformOs::MacOs
        } else {
            PlatformOs::Windows
        };
        let arch = if cfg!(target_arch = "aarch64") {
            PlatformArch::Arm64
        } else if cfg!(target_arch = "x86_64") {
            PlatformArch::X86_64
        } else {
            PlatformArch::Other
        };
        Platform { os, arch }
    }
}
