//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use slab_core::{
    BackendRegistry, Configurator, Installer, Loader, ModelManager, Recorder, Selector, Tracker,
};

use crate::config::Config;

/// State shared across all HTTP handlers.
///
/// Built once in `main` and handed out as `Arc<AppState>`, per SPEC_FULL.md
/// §9's "initialize in a single constructor, never rely on module init
/// order" rule.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: BackendRegistry,
    pub installer: Arc<Installer>,
    pub loader: Loader,
    pub selector: Arc<Selector>,
    pub configurator: Arc<Configurator>,
    pub recorder: Arc<Recorder>,
    pub model_manager: Arc<dyn ModelManager>,
    pub tracker: Arc<dyn Tracker>,
}
