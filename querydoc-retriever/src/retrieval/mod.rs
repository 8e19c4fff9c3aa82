//! Two-stage retrieval: coarse section ranking followed by chunk ranking
//! restricted to the selected sections.
//!
//! ```text
//! query ─ embed once ─┬─ coarse_search(sections) ── top sections ─┐
//!                     └──────────────────────────── fine_search(chunks ∈ top sections) ── top chunks
//! ```

use crate::error::{Result, RetrievalError, check_dimension};
use querydoc_embed::EmbeddingProvider;

pub mod coarse_search;
pub mod fine_search;
pub mod hnsw;
pub mod retriever;
pub mod section_rep;
pub mod similarity;
pub mod vector_index;

pub use coarse_search::{CoarseSearch, CoarseStrategy, ScoredSection};
pub use fine_search::{ScoredChunk, fine_search, flat_search};
pub use hnsw::{HnswIndex, HnswParams};
pub use retriever::{Retrieval, Retriever, retrieve};
pub use section_rep::{attach_chunk_means, build_section_representations};
pub use vector_index::{ExactIndex, IndexKind, Metric, Neighbor, VectorIndex, build_index};

/// Embed `texts` with one provider call, checking the batch contract: one vector
/// per input, all of one dimensionality.
pub(crate) async fn embed_batch(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let result = provider.embed_texts(texts).await?;
    if result.embeddings.len() != texts.len() {
        return Err(RetrievalError::ProviderContract {
            expected: texts.len(),
            actual: result.embeddings.len(),
        });
    }

    if let Some(first) = result.embeddings.first() {
        let expected = first.len();
        for embedding in &result.embeddings {
            check_dimension(expected, embedding.len())?;
        }
    }

    Ok(result.embeddings)
}
