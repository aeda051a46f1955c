//! The inference mode a runner is serving.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// The kind of OpenAI-compatible traffic a runner was spawned to handle.
///
/// Part of the runner [`crate::runner::RunnerKey`] — two requests for the
/// same model but different modes never share a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Mode {
    Completion,
    Embedding,
    Reranking,
    ImageGeneration,
    Passthrough,
}

impl Mode {
    /// Derive a [`Mode`] from the trailing path segment of an inference route.
    ///
    /// Returns `None` for unrecognized suffixes; the dispatcher maps that to
    /// a 500 per the spec (an unknown suffix indicates a routing bug, not a
    /// client error).
    pub fn from_path_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "v1/chat/completions" | "v1/completions" => Some(Mode::Completion),
            "v1/embeddings" => Some(Mode::Embedding),
            "rerank" | "score" => Some(Mode::Reranking),
            "v1/images/generations" | "v1/images/edits" => Some(Mode::ImageGeneration),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_suffixes() {
        assert_eq!(
            Mode::from_path_suffix("v1/chat/completions"),
            Some(Mode::Completion)
        );
        assert_eq!(Mode::from_path_suffix("v1/embeddings"), Some(Mode::Embedding));
        assert_eq!(Mode::from_path_suffix("rerank"), Some(Mode::Reranking));
        assert_eq!(Mode::from_path_suffix("score"), Some(Mode::Reranking));
        assert_eq!(
            Mode::from_path_suffix("v1/images/generations"),
            Some(Mode::ImageGeneration)
        );
    }

    #[test]
    fn rejects_unknown_suffix() {
        assert_eq!(Mode::from_path_suffix("v1/unknown"), None);
    }

    #[test]
    fn serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&Mode::ImageGeneration).unwrap(),
            "\"image-generation\""
        );
    }
}
