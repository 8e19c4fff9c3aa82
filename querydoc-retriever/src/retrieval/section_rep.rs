//! Section representations: a title embedding and the mean chunk embedding.

use crate::document::{ChunkIndex, Section, SectionId};
use crate::error::{Result, check_dimension};
use crate::retrieval::embed_batch;
use crate::retrieval::similarity::mean;
use querydoc_embed::EmbeddingProvider;
use std::collections::HashMap;

/// Embed every title in one provider call and attach chunk means.
///
/// Returns new section records in input order; `chunks` is never modified.
/// A section without chunks gets `avg_chunk_emb = None`.
pub async fn build_section_representations(
    provider: &dyn EmbeddingProvider,
    sections: &[Section],
    chunks: &ChunkIndex,
) -> Result<Vec<Section>> {
    let titles: Vec<String> = sections.iter().map(|s| s.title.clone()).collect();
    let title_embeddings = embed_batch(provider, &titles).await?;

    if let (Some(title), Some(expected)) = (title_embeddings.first(), chunks.dimension()) {
        check_dimension(expected, title.len())?;
    }

    let with_titles: Vec<Section> = sections
        .iter()
        .cloned()
        .zip(title_embeddings)
        .map(|(mut section, embedding)| {
            section.title_emb = Some(embedding);
            section
        })
        .collect();

    let built = attach_chunk_means(with_titles, chunks);
    tracing::debug!(
        "Built representations for {} sections ({} without chunks)",
        built.len(),
        built.iter().filter(|s| s.avg_chunk_emb.is_none()).count()
    );
    Ok(built)
}

/// Set each section's `avg_chunk_emb` to the mean embedding of the chunks whose
/// `section_id` matches, or `None` when no chunk does.
pub fn attach_chunk_means(sections: Vec<Section>, chunks: &ChunkIndex) -> Vec<Section> {
    let mut grouped: HashMap<&SectionId, Vec<&[f32]>> = HashMap::new();
    for chunk in chunks {
        grouped
            .entry(&chunk.section_id)
            .or_default()
            .push(chunk.embedding.as_slice());
    }

    sections
        .into_iter()
        .map(|mut section| {
            section.avg_chunk_emb = grouped
                .get(&section.id)
                .and_then(|embeddings| mean(embeddings.iter().copied()));
            section
        })
        .collect()
}
