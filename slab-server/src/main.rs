//! slab-server – entry point.
//!
//! Startup order:
//! 1. Parse configuration from environment variables.
//! 2. Initialise structured tracing (JSON in production, pretty in dev).
//! 3. Build the backend registry, the scheduling core (installer, loader,
//!    selector, configurator, recorder), and the model manager.
//! 4. Run the installer's eager-install pass in the background.
//! 5. Build the Axum router and start the HTTP server with graceful
//!    shutdown, tearing down every live runner before exit.

mod backends;
mod config;
mod error;
mod middleware;
mod model_manager;
mod routes;
mod state;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use slab_core::{
    BackendRegistry, Configurator, InMemoryTracker, Installer, Loader, Recorder, Selector,
};
use tracing::{info, warn};

use crate::backends::ProcessBackend;
use crate::config::Config;
use crate::model_manager::FsModelManager;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cfg = Config::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    // Build the log-level filter, warning loudly if the configured value is
    // not a valid tracing filter expression.
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: SLAB_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "slab-server starting");

    // ── 3. Scheduling core ──────────────────────────────────────────────────────
    tokio::fs::create_dir_all(&cfg.uds_dir).await?;
    tokio::fs::create_dir_all(&cfg.models_dir).await?;

    let llama_cpp: Arc<dyn slab_core::Backend> = Arc::new(
        ProcessBackend::new("llama-cpp", "llama-server"),
    );
    let vllm: Arc<dyn slab_core::Backend> = Arc::new(
        ProcessBackend::new("vllm", "vllm")
            .deferred(true)
            .uses_tcp(true),
    );

    let registry = BackendRegistry::new(vec![llama_cpp, vllm], cfg.default_backend.clone());

    let installer = Arc::new(Installer::new(registry.clone()));
    let loader = Loader::new(cfg.slot_pool_size, cfg.uds_dir.clone(), cfg.tcp_base_port);
    let selector = Arc::new(Selector::new(registry.clone()));

    let mut allowlists = HashMap::new();
    allowlists.insert(
        "llama-cpp".to_owned(),
        vec![
            "n-gpu-layers".to_owned(),
            "ctx-size".to_owned(),
            "threads".to_owned(),
        ],
    );
    allowlists.insert(
        "vllm".to_owned(),
        vec!["gpu-memory-utilization".to_owned(), "max-model-len".to_owned()],
    );
    let configurator = Arc::new(Configurator::new(allowlists));

    let recorder = Arc::new(Recorder::new(cfg.recorder_capacity));
    let model_manager = Arc::new(FsModelManager::new(cfg.models_dir.clone()));
    let tracker: Arc<dyn slab_core::Tracker> = Arc::new(InMemoryTracker::new());

    // ── 4. Eager install pass ───────────────────────────────────────────────────
    let installer_bg = installer.clone();
    tokio::spawn(async move {
        installer_bg.run().await;
    });

    // ── 5. Shared application state ─────────────────────────────────────────────
    let state = AppState {
        config: Arc::new(cfg.clone()),
        registry,
        installer,
        loader: loader.clone(),
        selector,
        configurator,
        recorder,
        model_manager,
        tracker,
    };

    // ── 6. HTTP server with graceful shutdown ───────────────────────────────────
    let app = routes::build(state);
    let addr: SocketAddr = cfg.bind_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("tearing down all runners before exit");
    loader
        .unload(slab_core::UnloadRequest {
            backend: None,
            models: None,
            force: true,
        })
        .await;

    info!("slab-server stopped");
    Ok(())
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
