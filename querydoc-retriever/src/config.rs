//! `querydoc.toml` configuration.
//!
//! Every field has a default, so an empty or missing file is valid:
//!
//! ```toml
//! [retrieval]
//! beta = 0.3
//! top_sections = 3
//! top_chunks = 5
//! mode = "hierarchical"          # or "flat"
//! coarse_strategy = "score_blend" # or "vector_blend"
//!
//! [retrieval.index]
//! kind = "hnsw"
//! m = 16
//! ef_search = 50
//!
//! [chunking]
//! max_chunk_length = 800
//! clean_whitespace = true
//!
//! [embedding]
//! model_name = "multilingual-e5-small"
//! ```

use crate::error::{Result as RetrievalResult, RetrievalError, check_top_k};
use crate::retrieval::coarse_search::{CoarseSearch, CoarseStrategy, validate_beta};
use crate::retrieval::vector_index::IndexKind;
use anyhow::{Context, Result};
use querydoc_context::DEFAULT_MAX_CHUNK_LENGTH;
use querydoc_embed::{DEFAULT_MODEL_NAME, EmbedConfig, TokenizerConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name looked up in the base directory when `--config` is not given.
pub const CONFIG_FILE_NAME: &str = "querydoc.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryDocConfig {
    pub retrieval: RetrievalConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingSettings,
}

impl QueryDocConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Load `path` if given, else `base_dir/querydoc.toml` if it exists, else defaults.
    pub fn discover(base_dir: &Path, path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let candidate = base_dir.join(CONFIG_FILE_NAME);
                if candidate.is_file() {
                    Self::load(&candidate)
                } else {
                    tracing::debug!("No {} in {}, using defaults", CONFIG_FILE_NAME, base_dir.display());
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.retrieval.validate()?;
        self.chunking.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    /// Coarse section ranking, then chunk ranking within the chosen sections
    #[default]
    Hierarchical,
    /// Chunk ranking over the whole corpus
    Flat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Weight of the title channel in the section score
    pub beta: f32,
    pub top_sections: usize,
    pub top_chunks: usize,
    pub mode: RetrievalMode,
    pub coarse_strategy: CoarseStrategy,
    pub index: IndexKind,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            beta: 0.3,
            top_sections: 3,
            top_chunks: 5,
            mode: RetrievalMode::default(),
            coarse_strategy: CoarseStrategy::default(),
            index: IndexKind::default(),
        }
    }
}

impl RetrievalConfig {
    pub fn with_beta(self, beta: f32) -> Self {
        Self { beta, ..self }
    }

    pub fn with_top_sections(self, top_sections: usize) -> Self {
        Self {
            top_sections,
            ..self
        }
    }

    pub fn with_top_chunks(self, top_chunks: usize) -> Self {
        Self { top_chunks, ..self }
    }

    pub fn with_mode(self, mode: RetrievalMode) -> Self {
        Self { mode, ..self }
    }

    pub fn with_coarse_strategy(self, coarse_strategy: CoarseStrategy) -> Self {
        Self {
            coarse_strategy,
            ..self
        }
    }

    pub fn with_index(self, index: IndexKind) -> Self {
        Self { index, ..self }
    }

    pub fn validate(&self) -> RetrievalResult<()> {
        validate_beta(self.beta)?;
        check_top_k(self.top_sections)?;
        check_top_k(self.top_chunks)?;
        self.index.validate()
    }

    /// Coarse stage configured from these settings.
    pub fn coarse_search(&self) -> CoarseSearch {
        CoarseSearch::new(self.beta, self.top_sections)
            .with_strategy(self.coarse_strategy)
            .with_index(self.index.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_chunk_length: usize,
    /// Collapse whitespace runs in page text before chunking
    pub clean_whitespace: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_length: DEFAULT_MAX_CHUNK_LENGTH,
            clean_whitespace: true,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> RetrievalResult<()> {
        if self.max_chunk_length == 0 {
            return Err(RetrievalError::invalid_parameter(
                "max_chunk_length must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Which embedding model to load. Maps onto [`EmbedConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub model_name: String,
    /// Directory for downloaded models, relative paths resolve against the base directory
    pub model_base_path: PathBuf,
    /// HuggingFace repository for models that are not built into fastembed
    pub hf_model_repo: Option<String>,
    pub hf_revision: Option<String>,
    pub batch_size: Option<usize>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL_NAME.to_string(),
            model_base_path: PathBuf::from("models"),
            hf_model_repo: None,
            hf_revision: None,
            batch_size: None,
        }
    }
}

impl EmbeddingSettings {
    /// Names the model behind stored embeddings: `repo@revision` for Hub
    /// models, the model name for built-in ones. Documents embedded under a
    /// different id cannot be searched with this model.
    pub fn model_id(&self) -> String {
        match &self.hf_model_repo {
            Some(repo) => format!("{repo}@{}", self.hf_revision.as_deref().unwrap_or("main")),
            None => self.model_name.clone(),
        }
    }

    pub fn to_embed_config(&self, base_dir: &Path) -> EmbedConfig {
        let model_base_path = base_dir.join(&self.model_base_path);
        let mut config = match &self.hf_model_repo {
            Some(repo) => EmbedConfig::from_huggingface(&model_base_path, &self.model_name, repo),
            None => EmbedConfig {
                tokenizer_config: TokenizerConfig::standard(model_base_path.join(&self.model_name)),
                model_base_path,
                ..EmbedConfig::builtin(&self.model_name)
            },
        };
        if let Some(revision) = &self.hf_revision {
            config = config.with_revision(revision);
        }
        if let Some(batch_size) = self.batch_size {
            config = config.with_batch_size(batch_size);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::hnsw::HnswParams;
    use tempfile::tempdir;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = QueryDocConfig::from_toml("").unwrap();
        assert_eq!(config, QueryDocConfig::default());
        assert_eq!(config.retrieval.beta, 0.3);
        assert_eq!(config.retrieval.top_sections, 3);
        assert_eq!(config.retrieval.top_chunks, 5);
        assert_eq!(config.chunking.max_chunk_length, 800);
        assert!(config.chunking.clean_whitespace);
        assert_eq!(config.embedding.model_name, DEFAULT_MODEL_NAME);
    }

    #[test]
    fn test_partial_file() {
        let config = QueryDocConfig::from_toml(
            r#"
[retrieval]
beta = 0.5
mode = "flat"
coarse_strategy = "vector_blend"

[retrieval.index]
kind = "hnsw"
ef_search = 80

[chunking]
max_chunk_length = 400
"#,
        )
        .unwrap();

        assert_eq!(config.retrieval.beta, 0.5);
        assert_eq!(config.retrieval.top_chunks, 5);
        assert_eq!(config.retrieval.mode, RetrievalMode::Flat);
        assert_eq!(config.retrieval.coarse_strategy, CoarseStrategy::VectorBlend);
        assert_eq!(
            config.retrieval.index,
            IndexKind::Hnsw(HnswParams {
                ef_search: 80,
                ..HnswParams::default()
            })
        );
        assert_eq!(config.chunking.max_chunk_length, 400);
        assert!(config.chunking.clean_whitespace);
    }

    #[test]
    fn test_model_id() {
        assert_eq!(EmbeddingSettings::default().model_id(), DEFAULT_MODEL_NAME);

        let hub = QueryDocConfig::from_toml(
            "[embedding]\nmodel_name = \"bge\"\nhf_model_repo = \"BAAI/bge-small-en-v1.5\"",
        )
        .unwrap();
        assert_eq!(hub.embedding.model_id(), "BAAI/bge-small-en-v1.5@main");

        let pinned = EmbeddingSettings {
            hf_revision: Some("v2".to_string()),
            ..hub.embedding
        };
        assert_eq!(pinned.model_id(), "BAAI/bge-small-en-v1.5@v2");
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(QueryDocConfig::from_toml("[retrieval]\nbeta = 1.5").is_err());
        assert!(QueryDocConfig::from_toml("[retrieval]\ntop_chunks = 0").is_err());
        assert!(QueryDocConfig::from_toml("[chunking]\nmax_chunk_length = 0").is_err());
        assert!(QueryDocConfig::from_toml("[retrieval]\nmode = \"sideways\"").is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = QueryDocConfig {
            retrieval: RetrievalConfig::default()
                .with_beta(0.7)
                .with_index(IndexKind::Hnsw(HnswParams::default())),
            ..QueryDocConfig::default()
        };
        let text = config.to_toml().unwrap();
        assert_eq!(QueryDocConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_discover() {
        let dir = tempdir().unwrap();
        assert_eq!(
            QueryDocConfig::discover(dir.path(), None).unwrap(),
            QueryDocConfig::default()
        );

        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "[retrieval]\ntop_sections = 7\n").unwrap();
        let config = QueryDocConfig::discover(dir.path(), None).unwrap();
        assert_eq!(config.retrieval.top_sections, 7);

        let missing = dir.path().join("missing.toml");
        assert!(QueryDocConfig::discover(dir.path(), Some(&missing)).is_err());
    }

    #[test]
    fn test_embedding_settings() {
        let base = Path::new("/data");
        let builtin = EmbeddingSettings::default().to_embed_config(base);
        assert!(!builtin.is_huggingface_model());
        assert_eq!(builtin.model_base_path, PathBuf::from("/data/models"));

        let hub = EmbeddingSettings {
            model_name: "e5-large".to_string(),
            hf_model_repo: Some("intfloat/multilingual-e5-large".to_string()),
            batch_size: Some(4),
            ..EmbeddingSettings::default()
        }
        .to_embed_config(base);
        assert_eq!(hub.hf_repo(), Some("intfloat/multilingual-e5-large"));
        assert_eq!(hub.batch_size, 4);
        assert_eq!(hub.model_path(), PathBuf::from("/data/models/e5-large"));
    }
}
