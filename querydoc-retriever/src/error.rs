//! Errors raised by the retrieval core.

use crate::document::SectionId;
use querydoc_embed::EmbedError;

pub type Result<T> = std::result::Result<T, RetrievalError>;

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    /// Two vectors that must share a dimensionality do not. Never truncated or padded.
    #[error("Embedding dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    /// An index or document was built from zero vectors or chunks.
    #[error("Cannot build an index from an empty collection")]
    EmptyIndex,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Duplicate section id: {0}")]
    DuplicateSection(SectionId),

    /// The embedding provider returned the wrong number of vectors for a batch.
    #[error("Embedding provider returned {actual} vectors for {expected} inputs")]
    ProviderContract { expected: usize, actual: usize },

    #[error(transparent)]
    Embedding(#[from] EmbedError),
}

impl RetrievalError {
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter(message.into())
    }
}

/// Fail with [`RetrievalError::DimensionMismatch`] unless `found == expected`.
pub fn check_dimension(expected: usize, found: usize) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(RetrievalError::DimensionMismatch { expected, found })
    }
}

/// `top_k` must be positive everywhere a ranking is requested.
pub fn check_top_k(top_k: usize) -> Result<()> {
    if top_k == 0 {
        return Err(RetrievalError::invalid_parameter("top_k must be greater than 0"));
    }
    Ok(())
}
