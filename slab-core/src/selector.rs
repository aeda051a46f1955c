//! Maps a model to the backend that should actually serve it (SPEC_FULL.md §4.3).

use crate::backend::{BackendRegistry, Platform, PlatformArch, PlatformOs};
use crate::mode::Mode;
use crate::model_manager::ModelFormat;

/// Per-format preferred-backend table, resolved against the running platform.
///
/// Order matters: entries are tried in registration order and the first
/// platform-supported, registered backend wins (SPEC_FULL.md §4.3 rule 2).
pub struct Selector {
    registry: BackendRegistry,
    safetensors_preferences: Vec<(&'static str, fn(Platform) -> bool)>,
    image_generation_backend: &'static str,
}

fn linux(p: Platform) -> bool {
    matches!(p.os, PlatformOs::Linux)
}

fn macos_arm64(p: Platform) -> bool {
    matches!(p.os, PlatformOs::MacOs) && matches!(p.arch, PlatformArch::Arm64)
}

impl Selector {
    /// Build a selector over the given registry, wiring up the fixed
    /// platform-preference order from §4.3 rule 2: vLLM on Linux, vLLM-Metal
    /// on macOS/ARM64, MLX on macOS/ARM64 when vLLM-Metal is absent, SGLang
    /// on Linux when vLLM is absent.
    pub fn new(registry: BackendRegistry) -> Self {
        Self {
            registry,
            safetensors_preferences: vec![
                ("vllm", linux),
                ("vllm-metal", macos_arm64),
                ("mlx", macos_arm64),
                ("sglang", linux),
            ],
            image_generation_backend: "diffusers",
        }
    }

    /// Choose the backend that should serve `requested` given the model's
    /// on-disk `format` and the requested inference `mode`.
    ///
    /// Rule order, fixed: GGUF always goes to the default backend;
    /// Safetensors/DDUF try the platform-preference table in order; image
    /// generation prefers `diffusers` when registered; otherwise the
    /// requested backend is returned unchanged.
    pub fn select(&self, requested: &str, format: ModelFormat, mode: Mode) -> String {
        if mode == Mode::ImageGeneration && self.registry.contains(self.image_generation_backend) {
            return self.image_generation_backend.to_owned();
        }

        match format {
            ModelFormat::Gguf => self.registry.default_backend().to_owned(),
            ModelFormat::Safetensors | ModelFormat::Dduf => {
                let platform = Platform::current();
                for (name, supported) in &self.safetensors_preferences {
                    if self.registry.contains(name) && supported(platform) {
                        return (*name).to_owned();
                    }
                }
                requested.to_owned()
            }
            ModelFormat::Other => requested.to_owned(),
        }
    }
}

/// Registered-backend availability, keyed by name — used only by tests to
/// stand in for a real [`BackendRegistry`] without constructing subprocess
/// backends.
#[cfg(test)]
fn fake_registry(names: &[&str], default_backend: &str) -> BackendRegistry {
    use crate::backend::{BindTarget, Backend};
    use crate::configurator::ModelConfig;
    use crate::error::RuntimeError;
    use crate::model_manager::ModelId;
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    struct Stub(&'static str);

    #[async_trait]
    impl Backend for Stub {
        fn name(&self) -> &str {
            self.0
        }

        async fn install(&self, _cancel: CancellationToken) -> Result<(), RuntimeError> {
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

    let backends: Vec<Arc<dyn Backend>> = names
        .iter()
        .map(|n| Arc::new(Stub(n)) as Arc<dyn Backend>)
        .collect();
    BackendRegistry::new(backends, default_backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gguf_always_goes_to_default() {
        let selector = Selector::new(fake_registry(&["llama-cpp", "vllm"], "llama-cpp"));
        assert_eq!(
            selector.select("vllm", ModelFormat::Gguf, Mode::Completion),
            "llama-cpp"
        );
    }

    #[test]
    fn safetensors_prefers_vllm_on_linux() {
        if !linux(Platform::current()) {
            return;
        }
        let selector = Selector::new(fake_registry(&["llama-cpp", "vllm"], "llama-cpp"));
        assert_eq!(
            selector.select("llama-cpp", ModelFormat::Safetensors, Mode::Completion),
            "vllm"
        );
    }

    #[test]
    fn safetensors_falls_back_to_requested_when_no_preference_registered() {
        let selector = Selector::new(fake_registry(&["llama-cpp"], "llama-cpp"));
        assert_eq!(
            selector.select("llama-cpp", ModelFormat::Safetensors, Mode::Completion),
            "llama-cpp"
        );
    }

    #[test]
    fn image_generation_prefers_diffusers_when_registered() {
        let selector = Selector::new(fake_registry(&["llama-cpp", "diffusers"], "llama-cpp"));
        assert_eq!(
            selector.select("llama-cpp", ModelFormat::Safetensors, Mode::ImageGeneration),
            "diffusers"
        );
    }

    #[test]
    fn other_format_returns_requested() {
        let selector = Selector::new(fake_registry(&["llama-cpp"], "llama-cpp"));
        assert_eq!(
            selector.select("llama-cpp", ModelFormat::Other, Mode::Completion),
            "llama-cpp"
        );
    }
}
