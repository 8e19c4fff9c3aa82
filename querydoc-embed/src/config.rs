//! Configuration for embedding models

use crate::error::{EmbedError, Result};
use derive_builder::Builder;
use fastembed::EmbeddingModel;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Model used when nothing else is configured. Multilingual, since uploaded
/// manuals are frequently not in English.
pub const DEFAULT_MODEL_NAME: &str = "multilingual-e5-small";

/// Built-in fastembed models addressable by name.
const BUILTIN_MODELS: &[(&str, EmbeddingModel)] = &[
    ("multilingual-e5-small", EmbeddingModel::MultilingualE5Small),
    ("multilingual-e5-base", EmbeddingModel::MultilingualE5Base),
    ("all-MiniLM-L6-v2", EmbeddingModel::AllMiniLML6V2),
    ("bge-small-en-v1.5", EmbeddingModel::BGESmallENV15),
    ("bge-base-en-v1.5", EmbeddingModel::BGEBaseENV15),
];

/// Configuration for tokenizer files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(setter(into))]
pub struct TokenizerConfig {
    /// Path to the tokenizer.json file
    pub tokenizer_path: PathBuf,
    /// Path to the config.json file
    pub config_path: PathBuf,
    /// Path to the special_tokens_map.json file
    pub special_tokens_map_path: PathBuf,
    /// Path to the tokenizer_config.json file (optional, a minimal one is generated if missing)
    #[builder(default)]
    pub tokenizer_config_path: Option<PathBuf>,
}

impl TokenizerConfig {
    /// Create a new tokenizer configuration using the builder
    pub fn builder() -> TokenizerConfigBuilder {
        TokenizerConfigBuilder::default()
    }

    /// Standard HuggingFace layout inside a model directory
    pub fn standard<P: AsRef<Path>>(model_dir: P) -> Self {
        let model_dir = model_dir.as_ref();
        Self {
            tokenizer_path: model_dir.join("tokenizer.json"),
            config_path: model_dir.join("config.json"),
            special_tokens_map_path: model_dir.join("special_tokens_map.json"),
            tokenizer_config_path: Some(model_dir.join("tokenizer_config.json")),
        }
    }

    /// Check that every required tokenizer file exists
    pub fn validate(&self) -> Result<()> {
        let paths_to_check = [
            ("tokenizer", &self.tokenizer_path),
            ("config", &self.config_path),
            ("special tokens map", &self.special_tokens_map_path),
        ];

        for (name, path) in &paths_to_check {
            if !path.exists() {
                tracing::error!("Missing {}: {}", name, path.display());
                return Err(EmbedError::ModelFileNotFound {
                    path: path.to_path_buf(),
                });
            }
        }

        if let Some(path) = &self.tokenizer_config_path {
            if !path.exists() {
                tracing::warn!(
                    "tokenizer_config.json not found at {}, will generate minimal config",
                    path.display()
                );
            }
        }

        Ok(())
    }
}

/// Configuration for an embedding model.
///
/// Two kinds of model are supported. Built-in fastembed models are selected by
/// `model_name` alone. Models with `hf_model_repo` set are ONNX exports pulled
/// from the HuggingFace Hub into `model_base_path/model_name` and loaded as
/// user-defined models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(setter(into))]
pub struct EmbedConfig {
    /// Directory holding downloaded model directories
    #[builder(default = r#"PathBuf::from("models")"#)]
    pub model_base_path: PathBuf,
    /// Name of the embedding model
    pub model_name: String,
    /// HuggingFace repository, e.g. "intfloat/multilingual-e5-large"
    #[builder(default)]
    pub hf_model_repo: Option<String>,
    /// HuggingFace revision/branch
    #[builder(default = r#"Some("main".to_string())"#)]
    pub hf_revision: Option<String>,
    /// ONNX file inside the repository, relative to the model directory
    #[builder(default)]
    pub onnx_file: Option<String>,
    /// Number of texts handed to the model per inference call
    #[builder(default = "32")]
    pub batch_size: usize,
    /// L2-normalize every produced vector
    #[builder(default = "true")]
    pub normalize: bool,
    /// Tokenizer configuration (only read for HuggingFace models)
    pub tokenizer_config: TokenizerConfig,
}

impl EmbedConfig {
    /// Create a new embedding configuration using the builder
    pub fn builder() -> EmbedConfigBuilder {
        EmbedConfigBuilder::default()
    }

    /// Configuration for a built-in fastembed model
    pub fn builtin(model_name: impl Into<String>) -> Self {
        let model_name = model_name.into();
        let model_base_path = PathBuf::from("models");
        let tokenizer_config = TokenizerConfig::standard(model_base_path.join(&model_name));
        Self {
            model_base_path,
            model_name,
            hf_model_repo: None,
            hf_revision: Some("main".to_string()),
            onnx_file: None,
            batch_size: 32,
            normalize: true,
            tokenizer_config,
        }
    }

    /// Configuration for an ONNX model hosted on the HuggingFace Hub
    pub fn from_huggingface<P: AsRef<Path>>(
        model_base_path: P,
        model_name: impl Into<String>,
        hf_repo: impl Into<String>,
    ) -> Self {
        let model_name = model_name.into();
        let model_base_path = model_base_path.as_ref().to_path_buf();
        let tokenizer_config = TokenizerConfig::standard(model_base_path.join(&model_name));
        Self {
            model_base_path,
            model_name,
            hf_model_repo: Some(hf_repo.into()),
            hf_revision: Some("main".to_string()),
            onnx_file: None,
            // Hub models tend to be larger than the built-in ones
            batch_size: 16,
            normalize: true,
            tokenizer_config,
        }
    }

    /// Set the batch size for embedding generation (builder style)
    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }

    /// Set whether to normalize embeddings (builder style)
    pub fn with_normalize(self, normalize: bool) -> Self {
        Self { normalize, ..self }
    }

    /// Set the HuggingFace revision (builder style)
    pub fn with_revision<S: Into<String>>(self, revision: S) -> Self {
        Self {
            hf_revision: Some(revision.into()),
            ..self
        }
    }

    /// Set the ONNX file to download and load (builder style)
    pub fn with_onnx_file<S: Into<String>>(self, onnx_file: S) -> Self {
        Self {
            onnx_file: Some(onnx_file.into()),
            ..self
        }
    }

    /// Full path to the model directory
    pub fn model_path(&self) -> PathBuf {
        self.model_base_path.join(&self.model_name)
    }

    /// Repository-relative name of the ONNX file
    pub fn onnx_file_name(&self) -> &str {
        self.onnx_file.as_deref().unwrap_or("onnx/model_quantized.onnx")
    }

    /// Local path of the ONNX model file
    pub fn onnx_model_path(&self) -> PathBuf {
        self.model_path().join(self.onnx_file_name())
    }

    pub fn tokenizer_config(&self) -> &TokenizerConfig {
        &self.tokenizer_config
    }

    pub fn is_huggingface_model(&self) -> bool {
        self.hf_model_repo.is_some()
    }

    pub fn hf_repo(&self) -> Option<&str> {
        self.hf_model_repo.as_deref()
    }

    pub fn hf_revision(&self) -> &str {
        self.hf_revision.as_deref().unwrap_or("main")
    }

    /// Resolve `model_name` to a built-in fastembed model
    pub fn builtin_model(&self) -> Result<EmbeddingModel> {
        BUILTIN_MODELS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(&self.model_name))
            .map(|(_, model)| model.clone())
            .ok_or_else(|| {
                let known: Vec<&str> = BUILTIN_MODELS.iter().map(|(name, _)| *name).collect();
                EmbedError::invalid_config(format!(
                    "Unknown built-in model '{}' (known: {})",
                    self.model_name,
                    known.join(", ")
                ))
            })
    }

    /// Check that the configuration can be loaded
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(EmbedError::invalid_config("batch_size must be at least 1"));
        }

        if !self.is_huggingface_model() {
            return self.builtin_model().map(|_| ());
        }

        let onnx_path = self.onnx_model_path();
        if !onnx_path.exists() {
            tracing::error!("Missing ONNX model: {}", onnx_path.display());
            return Err(EmbedError::ModelFileNotFound { path: onnx_path });
        }

        self.tokenizer_config.validate()?;

        tracing::debug!("Model validation successful for: {}", self.model_name);
        Ok(())
    }
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self::builtin(DEFAULT_MODEL_NAME)
    }
}
