//! HuggingFace model downloading

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use hf_hub::api::tokio::{Api, ApiRepo};
use hf_hub::{Repo, RepoType};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Fetches ONNX exports and tokenizer files from the HuggingFace Hub into the
/// layout [`EmbedConfig`] expects.
pub struct ModelDownloader {
    api: Api,
}

impl ModelDownloader {
    pub fn new() -> Result<Self> {
        let api = Api::new().map_err(EmbedError::model_init)?;
        Ok(Self { api })
    }

    /// Download the model described by `config` unless every file is already present.
    /// Built-in models are fetched by fastembed itself and are skipped here.
    pub async fn ensure_model(&self, config: &EmbedConfig) -> Result<()> {
        if !config.is_huggingface_model() {
            tracing::debug!("Not a HuggingFace model, skipping download");
            return Ok(());
        }

        if is_model_complete(config) {
            tracing::info!("Model {} already exists and is complete", config.model_name);
            return Ok(());
        }

        let repo_id = config
            .hf_repo()
            .ok_or_else(|| EmbedError::invalid_config("HuggingFace repository not specified"))?;

        tracing::info!(
            "Downloading model {} from {} ({})",
            config.model_name,
            repo_id,
            config.hf_revision()
        );

        fs::create_dir_all(config.model_path()).await?;

        let repo = self.api.repo(Repo::with_revision(
            repo_id.to_string(),
            RepoType::Model,
            config.hf_revision().to_string(),
        ));
        self.download_model_files(&repo, config).await?;

        tracing::info!("Model {} downloaded successfully", config.model_name);
        Ok(())
    }

    async fn download_model_files(&self, repo: &ApiRepo, config: &EmbedConfig) -> Result<()> {
        for (remote_path, local_path) in required_downloads(config) {
            if local_path.exists() {
                tracing::debug!("File already exists: {}", local_path.display());
                continue;
            }
            if let Some(parent) = local_path.parent() {
                fs::create_dir_all(parent).await?;
            }

            tracing::info!("Downloading {} to {}", remote_path, local_path.display());

            match repo.get(&remote_path).await {
                Ok(cached) => {
                    fs::copy(&cached, &local_path).await?;
                }
                Err(e) if remote_path == "special_tokens_map.json" => {
                    tracing::warn!("Failed to download {}: {}", remote_path, e);
                    write_fallback_special_tokens_map(&local_path).await?;
                }
                Err(e) if remote_path == "tokenizer_config.json" => {
                    tracing::warn!(
                        "Failed to download {}: {}, a minimal config will be generated",
                        remote_path,
                        e
                    );
                }
                Err(e) => return Err(EmbedError::model_init(e)),
            }
        }

        Ok(())
    }
}

/// Download `config`'s model if it is a HuggingFace model that is not yet on disk.
pub async fn download_model(config: &EmbedConfig) -> Result<()> {
    ModelDownloader::new()?.ensure_model(config).await
}

/// Pairs of (repository path, local path) for every file the provider reads.
fn required_downloads(config: &EmbedConfig) -> Vec<(String, PathBuf)> {
    let tokenizer = config.tokenizer_config();
    let mut downloads = vec![
        (config.onnx_file_name().to_string(), config.onnx_model_path()),
        ("tokenizer.json".to_string(), tokenizer.tokenizer_path.clone()),
        ("config.json".to_string(), tokenizer.config_path.clone()),
        (
            "special_tokens_map.json".to_string(),
            tokenizer.special_tokens_map_path.clone(),
        ),
    ];
    if let Some(path) = &tokenizer.tokenizer_config_path {
        downloads.push(("tokenizer_config.json".to_string(), path.clone()));
    }
    downloads
}

/// tokenizer_config.json is optional, everything else must exist.
fn is_model_complete(config: &EmbedConfig) -> bool {
    required_downloads(config)
        .into_iter()
        .filter(|(remote, _)| remote != "tokenizer_config.json")
        .all(|(_, local)| {
            let exists = local.exists();
            if !exists {
                tracing::debug!("Missing file: {}", local.display());
            }
            exists
        })
}

async fn write_fallback_special_tokens_map(path: &Path) -> Result<()> {
    let fallback = serde_json::json!({
        "cls_token": "[CLS]",
        "sep_token": "[SEP]",
        "unk_token": "[UNK]",
        "pad_token": "[PAD]",
        "mask_token": "[MASK]"
    });
    let content =
        serde_json::to_string_pretty(&fallback).map_err(|e| EmbedError::External { source: e.into() })?;

    fs::write(path, content).await?;
    tracing::info!("Created fallback special_tokens_map.json");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_files_mean_incomplete() {
        let temp_dir = tempdir().unwrap();
        let config = EmbedConfig::from_huggingface(temp_dir.path(), "e5", "intfloat/e5");

        assert!(!is_model_complete(&config));
    }

    #[test]
    fn test_complete_without_optional_tokenizer_config() {
        let temp_dir = tempdir().unwrap();
        let config = EmbedConfig::from_huggingface(temp_dir.path(), "e5", "intfloat/e5");

        for (remote, local) in required_downloads(&config) {
            if remote == "tokenizer_config.json" {
                continue;
            }
            std::fs::create_dir_all(local.parent().unwrap()).unwrap();
            std::fs::write(&local, b"{}").unwrap();
        }

        assert!(is_model_complete(&config));
    }

    #[test]
    fn test_downloads_follow_configured_onnx_file() {
        let config = EmbedConfig::from_huggingface("/models", "e5", "intfloat/e5")
            .with_onnx_file("onnx/model_fp16.onnx");

        let downloads = required_downloads(&config);
        assert_eq!(downloads[0].0, "onnx/model_fp16.onnx");
        assert_eq!(
            downloads[0].1,
            PathBuf::from("/models/e5/onnx/model_fp16.onnx")
        );
        assert_eq!(downloads.len(), 5);
    }

    #[tokio::test]
    async fn test_fallback_special_tokens_map() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("special_tokens_map.json");

        write_fallback_special_tokens_map(&path).await.unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["cls_token"], "[CLS]");
    }
}
