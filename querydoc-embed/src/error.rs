//! Error types for the embedding system

use std::path::PathBuf;

/// Result type for embedding operations.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Error type for all embedding operations.
///
/// Covers configuration problems (missing model files, unknown models),
/// failures while loading a model, and failures while producing vectors.
/// Retrieval code wraps this enum unchanged, so callers can still tell a
/// provider outage from a bad query.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// Error when model files are not found or invalid
    #[error("Model file not found: {path}")]
    ModelFileNotFound { path: PathBuf },

    /// Error when model configuration is invalid
    #[error("Invalid model configuration: {message}")]
    InvalidConfig { message: String },

    /// Error during model initialization
    #[error("Model initialization failed: {source}")]
    ModelInitialization {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Error during embedding generation
    #[error("Embedding generation failed: {source}")]
    EmbeddingGeneration {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Text the provider refuses to embed
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// A shared model cache lock was poisoned by a panicking thread
    #[error("Model cache lock poisoned")]
    LockPoisoned,

    /// IO errors when reading model files
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Async task join errors
    #[error("Async task failed: {source}")]
    AsyncTask {
        #[from]
        source: tokio::task::JoinError,
    },

    /// Generic errors from other libraries
    #[error("External error: {source}")]
    External {
        #[from]
        source: anyhow::Error,
    },
}

impl EmbedError {
    /// Wrap an error raised while loading a model.
    pub fn model_init<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::ModelInitialization {
            source: Box::new(source),
        }
    }

    /// Wrap an error raised while producing embeddings.
    pub fn embedding_gen<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::EmbeddingGeneration {
            source: Box::new(source),
        }
    }

    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}
