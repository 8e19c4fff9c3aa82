//! Chunk-level ranking, restricted to the sections picked by the coarse stage.

use crate::document::{Chunk, ChunkIndex, SectionId};
use crate::error::{Result, check_top_k};
use crate::retrieval::vector_index::{IndexKind, Metric, build_index};
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoredChunk<'a> {
    pub chunk: &'a Chunk,
    pub score: f32,
    /// Position of the chunk in the chunk index
    pub position: usize,
}

/// Rank the chunks belonging to `target_sections` against a precomputed query
/// embedding.
///
/// An empty candidate set yields an empty result. Ties keep chunk index order.
pub fn fine_search<'a, 's>(
    query_embedding: &[f32],
    chunks: &'a ChunkIndex,
    target_sections: impl IntoIterator<Item = &'s SectionId>,
    top_k: usize,
    index: &IndexKind,
) -> Result<Vec<ScoredChunk<'a>>> {
    check_top_k(top_k)?;

    let targets: HashSet<&SectionId> = target_sections.into_iter().collect();
    let candidates: Vec<usize> = chunks
        .iter()
        .enumerate()
        .filter(|(_, chunk)| targets.contains(&chunk.section_id))
        .map(|(position, _)| position)
        .collect();

    tracing::debug!(
        "Fine search over {} chunks from {} sections",
        candidates.len(),
        targets.len()
    );
    rank_candidates(query_embedding, chunks, candidates, top_k, index)
}

/// Rank every chunk in the index, without a coarse stage.
pub fn flat_search<'a>(
    query_embedding: &[f32],
    chunks: &'a ChunkIndex,
    top_k: usize,
    index: &IndexKind,
) -> Result<Vec<ScoredChunk<'a>>> {
    check_top_k(top_k)?;
    tracing::debug!("Flat search over {} chunks", chunks.len());
    rank_candidates(query_embedding, chunks, (0..chunks.len()).collect(), top_k, index)
}

fn rank_candidates<'a>(
    query_embedding: &[f32],
    chunks: &'a ChunkIndex,
    candidates: Vec<usize>,
    top_k: usize,
    kind: &IndexKind,
) -> Result<Vec<ScoredChunk<'a>>> {
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let vectors: Vec<Vec<f32>> = candidates
        .iter()
        .map(|&position| chunks.as_slice()[position].embedding.clone())
        .collect();
    let index = build_index(kind, vectors, Metric::Cosine)?;

    Ok(index
        .query(query_embedding, top_k)?
        .into_iter()
        .map(|hit| {
            let position = candidates[hit.position];
            ScoredChunk {
                chunk: &chunks.as_slice()[position],
                score: hit.score,
                position,
            }
        })
        .collect())
}
