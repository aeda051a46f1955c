//! A live backend subprocess bound to one model and mode (SPEC_FULL.md §4.5).

mod proxy;

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Request, Response};
use hyper::body::Incoming;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, BindTarget};
use crate::configurator::ModelConfig;
use crate::error::RuntimeError;
use crate::keepalive::KeepAlive;
use crate::mode::Mode;
use crate::model_manager::ModelId;

pub use proxy::{socket_path, strip_to_v1};

/// Identifies a runner: one backend, serving one model, in one mode.
///
/// The loader's central invariant is that at most one runner per key is in
/// `{Loading, Ready, Active, Idle}` at any instant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunnerKey {
    pub backend: String,
    pub model_id: ModelId,
    pub mode: Mode,
}

/// A one-shot, multi-waiter condition. Mirrors the "ready latch" / "done
/// latch" language of SPEC_FULL.md §4.4-§4.5: fires exactly once, and any
/// number of tasks may await it both before and after it fires.
pub(crate) struct Latch {
    notify: Notify,
    fired: AtomicBool,
}

impl Latch {
    pub(crate) fn new() -> Self {
        Self {
            notify: Notify::new(),
            fired: AtomicBool::new(false),
        }
    }

    pub(crate) fn fire(&self) {
        self.fired.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub(crate) fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    pub(crate) async fn wait(&self) {
        loop {
            if self.is_fired() {
                return;
            }
            let notified = self.notify.notified();
            if self.is_fired() {
                return;
            }
            notified.await;
        }
    }
}

/// How many readiness probes to attempt, and the interval between them.
///
/// 60 probes at 500 ms bounds the worst case at 30 s, per SPEC_FULL.md §4.5.
pub const READINESS_PROBE_COUNT: usize = 60;
pub const READINESS_PROBE_INTERVAL: Duration = Duration::from_millis(500);

/// One live backend subprocess, its reverse-proxy transport, and its
/// lifecycle handles.
///
/// Runners never own a back-pointer to the loader; the loader looks them up
/// by [`RunnerKey`] and tracks their slot index itself (arena + index, per
/// SPEC_FULL.md §9).
pub struct Runner {
    pub key: RunnerKey,
    pub slot: usize,
    pub bind: BindTarget,
    pub model_ref: String,
    pub keep_alive: KeepAlive,
    cancel: CancellationToken,
    done: Arc<Latch>,
    run_result: Arc<StdMutex<Option<Result<(), RuntimeError>>>>,
    terminated_once: AtomicBool,
    transport: proxy::Transport,
}

impl Runner {
    /// Spawn the backend subprocess as a background task, along with a
    /// supervisor that fires the `done` latch as soon as it exits — whether
    /// from clean cancellation, a readiness timeout, or a mid-flight crash.
    /// The runner is not yet ready to serve; call [`Runner::wait_ready`]
    /// before proxying to it.
    pub fn spawn(
        backend: Arc<dyn Backend>,
        key: RunnerKey,
        slot: usize,
        bind: BindTarget,
        model_ref: String,
        config: ModelConfig,
    ) -> Self {
        let cancel = CancellationToken::new();
        let transport = proxy::Transport::for_target(&bind);
        let keep_alive = config.keep_alive.unwrap_or_default();
        let done = Arc::new(Latch::new());
        let run_result = Arc::new(StdMutex::new(None));

        let task_cancel = cancel.clone();
        let task_bind = bind.clone();
        let task_key = key.clone();
        let task_model_ref = model_ref.clone();
        let task_done = done.clone();
        let task_result = run_result.clone();
        tokio::spawn(async move {
            let result = backend
                .run(
                    task_bind,
                    task_key.model_id,
                    task_model_ref,
                    task_key.mode,
                    config,
                    task_cancel,
                )
                .await;
            *task_result.lock().expect("runner result lock poisoned") = Some(result);
            task_done.fire();
        });

        Runner {
            key,
            slot,
            bind,
            model_ref,
            keep_alive,
            cancel,
            done,
            run_result,
            terminated_once: AtomicBool::new(false),
            transport,
        }
    }

    /// Poll `/v1/models` until it answers with success, the subprocess exits
    /// early, or the probe budget is exhausted.
    pub async fn wait_ready(&self) -> Result<(), RuntimeError> {
        for _ in 0..READINESS_PROBE_COUNT {
            if self.done.is_fired() {
                return Err(RuntimeError::BackendTerminated {
                    key: self.key.clone(),
                });
            }
            if self.transport.probe_ready(&self.bind, "/v1/models").await {
                return Ok(());
            }
            tokio::select! {
                _ = tokio::time::sleep(READINESS_PROBE_INTERVAL) => {}
                _ = self.cancel.cancelled() => return Err(RuntimeError::Cancelled),
            }
        }

        Err(RuntimeError::BackendNotReadyInTime {
            key: self.key.clone(),
        })
    }

    /// Reverse-proxy one request to the backend subprocess.
    pub async fn proxy(
        &self,
        request: Request<Full<Bytes>>,
    ) -> Result<Response<Incoming>, RuntimeError> {
        proxy::forward(&self.transport, &self.bind, request).await
    }

    /// Whether the backend subprocess has already exited, for any reason.
    pub fn is_done(&self) -> bool {
        self.done.is_fired()
    }

    /// Wait for the backend subprocess to exit, however it exits.
    pub async fn wait_done(&self) {
        self.done.wait().await;
    }

    /// The backend's run result, once `done` has fired. `None` while still
    /// running.
    pub fn run_result(&self) -> Option<Result<(), RuntimeError>> {
        self.run_result
            .lock()
            .expect("runner result lock poisoned")
            .clone()
    }

    /// Cancel the backend's run context and wait for it to exit. Idempotent:
    /// a second call just waits for the same exit.
    pub async fn terminate(&self) {
        if !self.terminated_once.swap(true, Ordering::SeqCst) {
            self.cancel.cancel();
        }
        self.done.wait().await;
    }
}
