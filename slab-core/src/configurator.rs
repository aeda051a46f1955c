//! Validates and stores per-model runtime configuration (SPEC_FULL.md §4.7).

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::backend::BackendFlags;
use crate::error::RuntimeError;
use crate::keepalive::KeepAlive;
use crate::loader::Loader;
use crate::mode::Mode;

/// Speculative-decoding sub-config.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SpeculativeConfig {
    pub draft_model: Option<String>,
    pub num_tokens: Option<u32>,
    pub min_acceptance_rate: Option<f32>,
}

/// llama.cpp-specific sub-config.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlamaCppConfig {
    pub reasoning_budget: Option<i32>,
}

/// vLLM-specific sub-config.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VllmConfig {
    pub hf_overrides: Option<serde_json::Value>,
}

/// Stored, validated per-model runtime configuration.
///
/// Consulted by the loader on runner creation; never mutated in place while
/// a runner for the same `(backend, model)` is active (see
/// [`Configurator::set`]).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelConfig {
    pub context_size: Option<i64>,
    pub runtime_flags: Vec<String>,
    pub keep_alive: Option<KeepAlive>,
    pub mode: Option<Mode>,
    pub speculative: Option<SpeculativeConfig>,
    pub llama_cpp: Option<LlamaCppConfig>,
    pub vllm: Option<VllmConfig>,
    pub disable_loader_memory_check: bool,
    #[serde(skip)]
    pub extra_flags: BackendFlags,
}

/// Key under which a [`ModelConfig`] is stored: `(backend, model ref)`.
type ConfigKey = (String, String);

/// Stores accepted configuration, keyed by `(backend, model)`.
pub struct Configurator {
    allowlists: HashMap<String, Vec<String>>,
    configs: RwLock<HashMap<ConfigKey, ModelConfig>>,
}

impl Configurator {
    /// Build a configurator with the given per-backend runtime-flag
    /// allowlists.
    pub fn new(allowlists: HashMap<String, Vec<String>>) -> Self {
        Self {
            allowlists,
            configs: RwLock::new(HashMap::new()),
        }
    }

    /// Validate `flags` against the backend's allowlist and the no-path rule.
    ///
    /// Every flag must appear in the backend's allowlist (if one is
    /// registered) and must not contain `/` or `\` in either the flag name
    /// or an embedded `key=value` pair's value.
    pub fn validate_flags(&self, backend: &str, flags: &[String]) -> Result<(), RuntimeError> {
        for flag in flags {
            if flag.contains('/') || flag.contains('\\') {
                return Err(RuntimeError::FlagContainsPath {
                    flag: flag.clone(),
                });
            }
        }

        if let Some(allowed) = self.allowlists.get(backend) {
            for flag in flags {
                let key = flag.split('=').next().unwrap_or(flag);
                if !allowed.iter().any(|a| a == key) {
                    return Err(RuntimeError::FlagNotAllowed {
                        backend: backend.to_owned(),
                        flag: flag.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Validate and store a configuration for `(backend, model_ref)`.
    ///
    /// Rejects with [`RuntimeError::RunnerAlreadyActive`] if `loader` reports
    /// an active (lease-held) runner for this `(backend, model_id)` — the
    /// caller is responsible for resolving `model_ref` to `model_id` and
    /// passing both so this check and the storage key stay in sync with the
    /// model reference the client used.
    pub fn set(
        &self,
        loader: &Loader,
        backend: &str,
        model_id: &str,
        model_ref: &str,
        config: ModelConfig,
    ) -> Result<(), RuntimeError> {
        self.validate_flags(backend, &config.runtime_flags)?;

        if loader.is_active(backend, model_id) {
            return Err(RuntimeError::RunnerAlreadyActive {
                backend: backend.to_owned(),
                model_id: model_id.to_owned(),
            });
        }

        self.configs
            .write()
            .expect("configurator lock poisoned")
            .insert((backend.to_owned(), model_ref.to_owned()), config);
        Ok(())
    }

    /// Fetch the stored configuration for `(backend, model_ref)`, or the
    /// default if none was ever set.
    pub fn get(&self, backend: &str, model_ref: &str) -> ModelConfig {
        self.configs
            .read()
            .expect("configurator lock poisoned")
            .get(&(backend.to_owned(), model_ref.to_owned()))
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn configurator_with_allowlist() -> Configurator {
        let mut allow = Map::new();
        allow.insert(
            "llama-cpp".to_owned(),
            vec!["n-gpu-layers".to_owned(), "ctx-size".to_owned()],
        );
        Configurator::new(allow)
    }

    #[test]
    fn rejects_disallowed_flag() {
        let c = configurator_with_allowlist();
        let err = c
            .validate_flags("llama-cpp", &["--unsafe-flag".to_owned()])
            .unwrap_err();
        assert!(matches!(err, RuntimeError::FlagNotAllowed { .. }));
    }

    #[test]
    fn accepts_allowed_flag_with_value() {
        let c = configurator_with_allowlist();
        c.validate_flags("llama-cpp", &["n-gpu-layers=32".to_owned()])
            .unwrap();
    }

    #[test]
    fn rejects_path_in_flag() {
        let c = configurator_with_allowlist();
        let err = c
            .validate_flags("llama-cpp", &["ctx-size=../../etc/passwd".to_owned()])
            .unwrap_err();
        assert!(matches!(err, RuntimeError::FlagContainsPath { .. }));

        let err = c
            .validate_flags("llama-cpp", &["n-gpu-layers=C:\\Windows".to_owned()])
            .unwrap_err();
        assert!(matches!(err, RuntimeError::FlagContainsPath { .. }));
    }

    #[test]
    fn unregistered_backend_has_no_allowlist_restriction() {
        let c = configurator_with_allowlist();
        c.validate_flags("vllm", &["--anything".to_owned()])
            .unwrap();
    }

    #[test]
    fn stores_and_retrieves_config() {
        let c = configurator_with_allowlist();
        let mut cfg = ModelConfig::default();
        cfg.context_size = Some(4096);
        let configs = &c.configs;
        configs
            .write()
            .unwrap()
            .insert(("llama-cpp".to_owned(), "m1".to_owned()), cfg);
        let got = c.get("llama-cpp", "m1");
        assert_eq!(got.context_size, Some(4096));
    }

    #[test]
    fn default_config_when_unset() {
        let c = configurator_with_allowlist();
        let got = c.get("llama-cpp", "nonexistent");
        assert_eq!(got.context_size, None);
        assert!(got.runtime_flags.is_empty());
    }
}
