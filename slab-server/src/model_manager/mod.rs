//! A filesystem-backed [`slab_core::ModelManager`].
//!
//! The real model distribution/registry/storage layer (pull, push, tag,
//! content-addressed blob store) is explicitly out of scope (SPEC_FULL.md
//! §1); this is the minimal concrete collaborator that lets slab-server
//! actually run end to end against a directory of model files dropped on
//! disk, the way an operator would lay them out by hand.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use slab_core::{ModelBundle, ModelFormat, ModelId, ModelManager, ModelRecord, RuntimeError};
use tracing::debug;

/// Scans a root directory for model files, identifying each by a content-ish
/// digest derived from its canonical path, size and modification time.
///
/// Hashing full model weights (often tens of gigabytes) on every request
/// would make every lookup I/O-bound; the digest below is cheap and stable
/// across process restarts as long as the file itself isn't rewritten.
pub struct FsModelManager {
    root: PathBuf,
}

impl FsModelManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn locate(&self, model_ref: &str) -> Result<PathBuf, RuntimeError> {
        if model_ref.is_empty() || model_ref.contains("..") {
            return Err(RuntimeError::InvalidRequest {
                message: format!("invalid model reference: {model_ref:?}"),
            });
        }
        find_by_stem(&self.root, model_ref)
            .await
            .ok_or_else(|| RuntimeError::ModelNotFound {
                model_ref: model_ref.to_owned(),
            })
    }
}

#[async_trait]
impl ModelManager for FsModelManager {
    async fn get_local(&self, model_ref: &str) -> Result<ModelRecord, RuntimeError> {
        let path = self.locate(model_ref).await?;
        let format = format_of(&path).ok_or_else(|| RuntimeError::Internal {
            message: format!("unrecognized model file format: {}", path.display()),
        })?;
        let id = digest_of(&path).await?;
        Ok(ModelRecord {
            id,
            model_ref: model_ref.to_owned(),
            format,
        })
    }

    async fn resolve_id(&self, model_ref: &str) -> Result<ModelId, RuntimeError> {
        let path = self.locate(model_ref).await?;
        digest_of(&path).await
    }

    async fn get_bundle(&self, model_ref: &str) -> Result<ModelBundle, RuntimeError> {
        let path = self.locate(model_ref).await?;
        let id = digest_of(&path).await?;
        let dir = path.parent().unwrap_or(&self.root).to_path_buf();

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|err| RuntimeError::Internal {
                message: format!("reading bundle dir {}: {err}", dir.display()),
            })?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| RuntimeError::Internal {
                message: format!("reading bundle dir {}: {err}", dir.display()),
            })?
        {
            if entry.path().is_file() {
                files.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        Ok(ModelBundle {
            id,
            root: dir.display().to_string(),
            files,
        })
    }

    async fn get_disk_usage(&self) -> Result<i64, RuntimeError> {
        let total = dir_size(&self.root).await.map_err(|err| RuntimeError::Internal {
            message: format!("scanning {}: {err}", self.root.display()),
        })?;
        Ok(total as i64)
    }
}

fn format_of(path: &Path) -> Option<ModelFormat> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("gguf") => Some(ModelFormat::Gguf),
        Some("safetensors") => Some(ModelFormat::Safetensors),
        Some("dduf") => Some(ModelFormat::Dduf),
        Some(_) => Some(ModelFormat::Other),
        None => None,
    }
}

/// Recursively search `root` for a file whose stem (filename without
/// extension) matches `stem`, preferring a path component match for
/// namespaced references like `"org/model-name"`.
fn find_by_stem<'a>(root: &'a Path, stem: &'a str) -> std::pin::Pin<Box<dyn std::future::Future<Output = Option<PathBuf>> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = tokio::fs::read_dir(root).await.ok()?;
        let mut subdirs = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.is_dir() {
                subdirs.push(path);
                continue;
            }
            if format_of(&path).is_none() {
                continue;
            }
            let matches = path
                .file_stem()
                .map(|s| s.to_string_lossy() == stem)
                .unwrap_or(false)
                || path.to_string_lossy().ends_with(stem);
            if matches {
                debug!(path = %path.display(), "resolved model reference to file");
                return Some(path);
            }
        }
        for dir in subdirs {
            if let Some(found) = find_by_stem(&dir, stem).await {
                return Some(found);
            }
        }
        None
    })
}

fn dir_size<'a>(root: &'a Path) -> std::pin::Pin<Box<dyn std::future::Future<Output = std::io::Result<u64>> + Send + 'a>> {
    Box::pin(async move {
        let mut total = 0u64;
        let mut entries = match tokio::fs::read_dir(root).await {
            Ok(e) => e,
            Err(_) => return Ok(0),
        };
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_dir() {
                total += dir_size(&entry.path()).await?;
            } else {
                total += meta.len();
            }
        }
        Ok(total)
    })
}

async fn digest_of(path: &Path) -> Result<ModelId, RuntimeError> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|err| RuntimeError::Internal {
            message: format!("stat {}: {err}", path.display()),
        })?;
    let modified = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let canonical = tokio::fs::canonicalize(path)
        .await
        .unwrap_or_else(|_| path.to_path_buf());

    let mut hasher = Sha256::new();
    hasher.update(canonical.display().to_string().as_bytes());
    hasher.update(meta.len().to_le_bytes());
    hasher.update(modified.to_le_bytes());
    let digest = hasher.finalize();
    let full = format!("sha256:{:x}", digest);
    Ok(full[..23].to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_not_found_for_missing_model() {
        let dir = std::env::temp_dir().join(format!("slab-fsmm-test-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let manager = FsModelManager::new(&dir);
        let err = manager.get_local("does-not-exist").await.unwrap_err();
        assert!(matches!(err, RuntimeError::ModelNotFound { .. }));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn rejects_traversal_in_model_ref() {
        let dir = std::env::temp_dir().join(format!("slab-fsmm-test2-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let manager = FsModelManager::new(&dir);
        let err = manager.get_local("../etc/passwd").await.unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidRequest { .. }));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn finds_and_identifies_a_gguf_file() {
        let dir = std::env::temp_dir().join(format!("slab-fsmm-test3-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let file = dir.join("qwen2.5-7b.gguf");
        tokio::fs::write(&file, b"fake weights").await.unwrap();

        let manager = FsModelManager::new(&dir);
        let record = manager.get_local("qwen2.5-7b").await.unwrap();
        assert_eq!(record.format, ModelFormat::Gguf);
        assert!(record.id.starts_with("sha256:"));

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
