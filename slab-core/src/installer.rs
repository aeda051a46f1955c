//! Drives per-backend installation lifecycle and gates requests until ready
//! (SPEC_FULL.md §4.2).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::{Backend, BackendRegistry};
use crate::error::RuntimeError;
use crate::runner::Latch;

struct Status {
    installed: Arc<Latch>,
    failed: Arc<Latch>,
    err: Mutex<Option<RuntimeError>>,
    deferred: bool,
}

impl Status {
    fn pending(deferred: bool) -> Self {
        Self {
            installed: Arc::new(Latch::new()),
            failed: Arc::new(Latch::new()),
            err: Mutex::new(None),
            deferred,
        }
    }
}

/// Owns the installed/failed latch pair per backend and serializes actual
/// installs behind a separate mutex from the status-map lock, so one long
/// download never starves readers of `wait`/`is_installed`.
pub struct Installer {
    registry: BackendRegistry,
    statuses: Mutex<HashMap<String, Arc<Status>>>,
    install_lock: AsyncMutex<()>,
    started: std::sync::atomic::AtomicBool,
}

impl Installer {
    pub fn new(registry: BackendRegistry) -> Self {
        let statuses = registry
            .iter()
            .map(|b| (b.name().to_owned(), Arc::new(Status::pending(b.deferred()))))
            .collect();
        Self {
            registry,
            statuses: Mutex::new(statuses),
            install_lock: AsyncMutex::new(()),
            started: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Run once at process start: install every non-deferred backend eagerly;
    /// for deferred backends, check `GetDiskUsage` to detect a previous
    /// session's install and verify it, otherwise leave them pending.
    pub async fn run(&self) {
        self.started.store(true, std::sync::atomic::Ordering::SeqCst);

        for backend in self.registry.iter() {
            let name = backend.name().to_owned();
            if backend.deferred() {
                match backend.get_disk_usage().await {
                    Ok(bytes) if bytes > 0 => {
                        info!(backend = %name, "deferred backend has prior install, verifying");
                        self.install_backend(&name).await;
                    }
                    Ok(_) => {
                        info!(backend = %name, "deferred backend not yet installed, leaving pending");
                    }
                    Err(err) => {
                        warn!(backend = %name, %err, "failed to probe deferred backend disk usage");
                    }
                }
                continue;
            }

            info!(backend = %name, "installing backend");
            self.install_backend(&name).await;
        }
    }

    /// Gate a request on `name` becoming ready, triggering on-demand install
    /// for deferred backends.
    pub async fn wait(&self, name: &str, cancel: &CancellationToken) -> Result<(), RuntimeError> {
        if !self.registry.contains(name) {
            return Err(RuntimeError::BackendNotFound {
                name: name.to_owned(),
            });
        }

        let status = self.status_for(name);

        if status.deferred {
            if status.installed.is_fired() {
                return Ok(());
            }
            if status.failed.is_fired() {
                return Err(self.failure_error(name, &status));
            }
            // Pending: trigger on-demand install and block on its outcome.
            self.install_backend(name).await;
            return self.outcome(name, &status);
        }

        if !self.started.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(RuntimeError::InstallerNotStarted);
        }

        tokio::select! {
            _ = status.installed.wait() => Ok(()),
            _ = status.failed.wait() => Err(self.failure_error(name, &status)),
            _ = cancel.cancelled() => Err(RuntimeError::Cancelled),
        }
    }

    fn status_for(&self, name: &str) -> Arc<Status> {
        self.statuses
            .lock()
            .expect("installer status lock poisoned")
            .get(name)
            .cloned()
            .expect("status entries are seeded for every registered backend")
    }

    fn outcome(&self, name: &str, status: &Arc<Status>) -> Result<(), RuntimeError> {
        if status.installed.is_fired() {
            Ok(())
        } else {
            Err(self.failure_error(name, status))
        }
    }

    fn failure_error(&self, name: &str, status: &Status) -> RuntimeError {
        let message = status
            .err
            .lock()
            .expect("installer err lock poisoned")
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "installation failed".to_owned());
        RuntimeError::BackendNotInstalled {
            name: name.to_owned(),
            message,
        }
    }

    /// Actually perform (or retry) installation for `name`, serialized by
    /// `install_lock` so concurrent callers don't run the download twice.
    ///
    /// A cancelled install does not mark the backend permanently failed: the
    /// status entry is left untouched for a future caller to retry
    /// (SPEC_FULL.md §4.2, §5).
    async fn install_backend(&self, name: &str) {
        let _permit = self.install_lock.lock().await;

        // Another caller may have finished the install while we waited for
        // the lock; re-check before repeating the work.
        let status = self.status_for(name);
        if status.installed.is_fired() {
            return;
        }

        let backend = match self.registry.get(name) {
            Ok(backend) => backend,
            Err(_) => return,
        };

        if status.failed.is_fired() {
            // Replace with a fresh pair of latches before retrying.
            let fresh = Arc::new(Status::pending(status.deferred));
            self.statuses
                .lock()
                .expect("installer status lock poisoned")
                .insert(name.to_owned(), fresh.clone());
            self.try_install(name, &backend, &fresh).await;
            return;
        }

        self.try_install(name, &backend, &status).await;
    }

    async fn try_install(&self, name: &str, backend: &Arc<dyn Backend>, status: &Arc<Status>) {
        let cancel = CancellationToken::new();
        match backend.install(cancel.clone()).await {
            Ok(()) => {
                info!(backend = %name, "backend installed");
                status.installed.fire();
            }
            Err(RuntimeError::Cancelled) => {
                warn!(backend = %name, "install cancelled, leaving backend pending for retry");
            }
            Err(err) => {
                warn!(backend = %name, %err, "backend install failed");
                *status.err.lock().expect("installer err lock poisoned") = Some(err);
                status.failed.fire();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, BindTarget};
    use crate::configurator::ModelConfig;
    use crate::mode::Mode;
    use crate::model_manager::ModelId;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct AlwaysFails;

    #[async_trait]
    impl Backend for AlwaysFails {
        fn name(&self) -> &str {
            "broken"
        }

        async fn install(&self, _cancel: CancellationToken) -> Result<(), RuntimeError> {
            Err(RuntimeError::Internal {
                message: "no".to_owned(),
            })
        }

        async fn run(
            &self,
            _target: BindTarget,
            _model_id: ModelId,
            _model_ref: String,
            _mode: Mode,
            _config: ModelConfig,
            _cancel: CancellationToken,
        ) -> Result<(), RuntimeError> {
            Ok(())
        }
    }

    struct CountingSucceeds(Arc<AtomicU32>);

    #[async_trait]
    impl Backend for CountingSucceeds {
        fn name(&self) -> &str {
            "good"
        }

        async fn install(&self, _cancel: CancellationToken) -> Result<(), RuntimeError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn run(
            &self,
            _target: BindTarget,
            _model_id: ModelId,
            _model_ref: String,
            _mode: Mode,
            _config: ModelConfig,
            _cancel: CancellationToken,
        ) -> Result<(), RuntimeError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn wait_unknown_backend_not_found() {
        let registry = BackendRegistry::new(
            vec![Arc::new(CountingSucceeds(Arc::new(AtomicU32::new(0))))],
            "good",
        );
        let installer = Installer::new(registry);
        installer.run().await;
        let cancel = CancellationToken::new();
        let err = installer.wait("missing", &cancel).await.unwrap_err();
        assert!(matches!(err, RuntimeError::BackendNotFound { .. }));
    }

    #[tokio::test]
    async fn eager_install_succeeds_before_wait() {
        let calls = Arc::new(AtomicU32::new(0));
        let registry = BackendRegistry::new(vec![Arc::new(CountingSucceeds(calls.clone()))], "good");
        let installer = Installer::new(registry);
        installer.run().await;

        let cancel = CancellationToken::new();
        installer.wait("good", &cancel).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_install_reported_as_not_installed() {
        let registry = BackendRegistry::new(vec![Arc::new(AlwaysFails)], "broken");
        let installer = Installer::new(registry);
        installer.run().await;

        let cancel = CancellationToken::new();
        let err = installer.wait("broken", &cancel).await.unwrap_err();
        assert!(matches!(err, RuntimeError::BackendNotInstalled { .. }));
    }
}
