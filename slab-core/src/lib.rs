//! The inference scheduling core: installer, selector, loader, runner,
//! configurator and recorder. Backends and model storage are consumed only
//! through the [`backend::Backend`] and [`model_manager::ModelManager`]
//! capability traits; this crate never implements either.

pub mod backend;
pub mod configurator;
pub mod error;
pub mod installer;
pub mod keepalive;
pub mod loader;
pub mod mode;
pub mod model_manager;
pub mod recorder;
pub mod runner;
pub mod selector;
pub mod tracker;

pub use backend::{Backend, BackendRegistry, BindTarget, Platform};
pub use configurator::{Configurator, ModelConfig};
pub use error::RuntimeError;
pub use installer::Installer;
pub use keepalive::KeepAlive;
pub use loader::{Lease, Loader, RunnerInfo, UnloadRequest};
pub use mode::Mode;
pub use model_manager::{ModelBundle, ModelFormat, ModelId, ModelManager, ModelRecord, ModelRef};
pub use recorder::Recorder;
pub use runner::{Runner, RunnerKey};
pub use selector::Selector;
pub use tracker::{InMemoryTracker, Tracker, UsageStats};
