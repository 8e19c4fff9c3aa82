//! # querydoc-embed
//!
//! Text embeddings for QueryDoc. Defines the [`EmbeddingProvider`] trait the
//! retrieval engine is written against, and a local ONNX implementation,
//! [`FastEmbedProvider`], built on fastembed.
//!
//! ## Quick Start
//!
//! ```no_run
//! use querydoc_embed::{EmbedConfig, EmbeddingProvider, FastEmbedProvider};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let provider = FastEmbedProvider::create(EmbedConfig::default()).await?;
//!
//! let titles = vec!["Installation".to_string(), "Troubleshooting".to_string()];
//! let result = provider.embed_texts(&titles).await?;
//!
//! println!("{} embeddings of dimension {}", result.len(), result.dimension);
//! # Ok(())
//! # }
//! ```
//!
//! ## Models
//!
//! - Built-in fastembed models, selected by name (`multilingual-e5-small` by
//!   default, `all-MiniLM-L6-v2`, `bge-small-en-v1.5`, ...).
//! - ONNX exports on the HuggingFace Hub, downloaded by [`ModelDownloader`]
//!   into `model_base_path/model_name` and loaded as user-defined models.
//!
//! Loaded models are cached process-wide, keyed by configuration, so building
//! several providers from one configuration loads the model once.
//!
//! ## Modules
//!
//! - [`config`]: model and tokenizer configuration
//! - [`provider`]: the provider trait and the fastembed implementation
//! - [`downloader`]: HuggingFace Hub downloads
//! - [`error`]: [`EmbedError`] and [`Result`]

pub mod config;
pub mod downloader;
pub mod error;
pub mod provider;

pub use config::{DEFAULT_MODEL_NAME, EmbedConfig, TokenizerConfig};
pub use downloader::{ModelDownloader, download_model};
pub use error::{EmbedError, Result};
pub use provider::{EmbeddingProvider, EmbeddingResult, FastEmbedProvider, l2_normalize};

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_creation() {
        let config = EmbedConfig::default();
        assert_eq!(config.model_name, DEFAULT_MODEL_NAME);
        assert!(!config.is_huggingface_model());

        let temp_dir = tempdir().unwrap();
        let hub = EmbedConfig::from_huggingface(
            temp_dir.path(),
            "multilingual-e5-large",
            "intfloat/multilingual-e5-large",
        )
        .with_revision("v1");
        assert!(hub.is_huggingface_model());
        assert_eq!(hub.hf_revision(), "v1");
    }
}
