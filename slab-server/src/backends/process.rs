//! A [`Backend`] that drives an external inference engine as a child
//! process, communicating readiness and requests over the bind target the
//! loader assigns it.
//!
//! This is the only place slab-server knows anything about *how* a backend
//! binary is invoked; it carries no llama.cpp/vLLM/MLX/SGLang/diffusers-
//! specific behavior; SPEC_FULL.md §1 keeps those out of scope entirely.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use slab_core::{BindTarget, Mode, ModelConfig, ModelId, RuntimeError};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Launches `binary` as a subprocess, passing the runner's bind target and
/// model reference as CLI flags.
pub struct ProcessBackend {
    name: String,
    binary: PathBuf,
    extra_args: Vec<String>,
    deferred: bool,
    uses_tcp: bool,
    uses_external_model_management: bool,
}

impl ProcessBackend {
    pub fn new(name: impl Into<String>, binary: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            binary: binary.into(),
            extra_args: Vec::new(),
            deferred: false,
            uses_tcp: false,
            uses_external_model_management: false,
        }
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    pub fn deferred(mut self, deferred: bool) -> Self {
        self.deferred = deferred;
        self
    }

    pub fn uses_tcp(mut self, uses_tcp: bool) -> Self {
        self.uses_tcp = uses_tcp;
        self
    }

    pub fn uses_external_model_management(mut self, value: bool) -> Self {
        self.uses_external_model_management = value;
        self
    }

    /// Whether the configured binary can actually be located, either as an
    /// absolute/relative path or on `$PATH`.
    fn binary_available(&self) -> bool {
        if self.binary.is_absolute() || self.binary.components().count() > 1 {
            return self.binary.exists();
        }
        std::env::var_os("PATH")
            .map(|paths| {
                std::env::split_paths(&paths).any(|dir| dir.join(&self.binary).exists())
            })
            .unwrap_or(false)
    }
}

/// Translate a validated runtime flag (`"key"` or `"key=value"`, per
/// [`slab_core::Configurator::validate_flags`]) into CLI arguments.
fn flag_to_args(flag: &str) -> Vec<String> {
    match flag.split_once('=') {
        Some((key, value)) => vec![format!("--{key}"), value.to_owned()],
        None => vec![format!("--{flag}")],
    }
}

fn bind_args(target: &BindTarget) -> Vec<String> {
    match target {
        BindTarget::Uds(path) => vec!["--uds".to_owned(), path.display().to_string()],
        BindTarget::Tcp(addr) => vec![
            "--host".to_owned(),
            addr.ip().to_string(),
            "--port".to_owned(),
            addr.port().to_string(),
        ],
    }
}

fn config_args(config: &ModelConfig) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(ctx) = config.context_size {
        args.push("--ctx-size".to_owned());
        args.push(ctx.to_string());
    }
    if let Some(llama) = &config.llama_cpp {
        if let Some(budget) = llama.reasoning_budget {
            args.push("--reasoning-budget".to_owned());
            args.push(budget.to_string());
        }
    }
    if let Some(spec) = &config.speculative {
        if let Some(draft) = &spec.draft_model {
            args.push("--draft-model".to_owned());
            args.push(draft.clone());
        }
        if let Some(n) = spec.num_tokens {
            args.push("--draft-tokens".to_owned());
            args.push(n.to_string());
        }
    }
    for flag in &config.runtime_flags {
        args.extend(flag_to_args(flag));
    }
    args
}

#[async_trait]
impl slab_core::Backend for ProcessBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn uses_external_model_management(&self) -> bool {
        self.uses_external_model_management
    }

    fn uses_tcp(&self) -> bool {
        self.uses_tcp
    }

    fn deferred(&self) -> bool {
        self.deferred
    }

    async fn install(&self, _cancel: CancellationToken) -> Result<(), RuntimeError> {
        if self.binary_available() {
            info!(backend = %self.name, binary = %self.binary.display(), "backend binary present");
            Ok(())
        } else {
            Err(RuntimeError::Internal {
                message: format!(
                    "backend binary {:?} not found on PATH for backend {}",
                    self.binary, self.name
                ),
            })
        }
    }

    async fn run(
        &self,
        target: BindTarget,
        model_id: ModelId,
        model_ref: String,
        mode: Mode,
        config: ModelConfig,
        cancel: CancellationToken,
    ) -> Result<(), RuntimeError> {
        let mut args = bind_args(&target);
        args.push("--model".to_owned());
        args.push(model_ref.clone());
        args.push("--mode".to_owned());
        args.push(mode.to_string());
        args.extend(config_args(&config));
        args.extend(self.extra_args.clone());

        let mut command = Command::new(&self.binary);
        command
            .args(&args)
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let mut child = command.spawn().map_err(|err| RuntimeError::Internal {
            message: format!("failed to spawn backend {}: {err}", self.name),
        })?;

        info!(
            backend = %self.name,
            model_id = %model_id,
            mode = %mode,
            "backend subprocess spawned"
        );

        tokio::select! {
            status = child.wait() => {
                match status {
                    Ok(status) if status.success() => Ok(()),
                    Ok(status) => Err(RuntimeError::Internal {
                        message: format!("backend {} exited with {status}", self.name),
                    }),
                    Err(err) => Err(RuntimeError::Internal {
                        message: format!("failed to wait on backend {}: {err}", self.name),
                    }),
                }
            }
            _ = cancel.cancelled() => {
                if let Err(err) = child.start_kill() {
                    warn!(backend = %self.name, %err, "failed to kill backend subprocess on cancel");
                }
                let _ = child.wait().await;
                Ok(())
            }
        }
    }

    fn status(&self) -> String {
        if self.binary_available() {
            "available".to_owned()
        } else {
            "missing binary".to_owned()
        }
    }

    async fn get_disk_usage(&self) -> Result<i64, RuntimeError> {
        match tokio::fs::metadata(&self.binary).await {
            Ok(meta) => Ok(meta.len() as i64),
            Err(_) => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_with_value_splits_on_equals() {
        assert_eq!(
            flag_to_args("n-gpu-layers=32"),
            vec!["--n-gpu-layers".to_owned(), "32".to_owned()]
        );
    }

    #[test]
    fn bare_flag_becomes_single_arg() {
        assert_eq!(flag_to_args("verbose"), vec!["--verbose".to_owned()]);
    }

    #[test]
    fn binary_available_false_for_nonexistent_absolute_path() {
        let backend = ProcessBackend::new("test", "/no/such/binary-xyz");
        assert!(!backend.binary_available());
    }
}
