//! Section-level ranking.
//!
//! A section scores `beta * cos(q, title) + (1 - beta) * cos(q, avg_chunk)`.
//! Sections missing either representation are skipped and the result is not
//! topped up to compensate.

use crate::document::Section;
use crate::error::{Result, RetrievalError, check_dimension, check_top_k};
use crate::retrieval::similarity::{cosine_with_norms, norm, unit};
use crate::retrieval::vector_index::{ExactIndex, IndexKind, Metric, Neighbor, VectorIndex, build_index, rank};
use querydoc_embed::EmbeddingProvider;
use serde::{Deserialize, Serialize};

/// How the blended section score is computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoarseStrategy {
    /// Score title and chunk mean separately and blend the scores
    #[default]
    ScoreBlend,
    /// Blend unit title and unit chunk-mean vectors up front and search them by
    /// inner product with the unit query. Ranks like `ScoreBlend` up to rounding.
    VectorBlend,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoredSection<'a> {
    pub section: &'a Section,
    pub score: f32,
    pub title_similarity: f32,
    pub chunk_similarity: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoarseSearch {
    pub beta: f32,
    pub top_k: usize,
    pub strategy: CoarseStrategy,
    /// Index used by the vector-blend strategy
    pub index: IndexKind,
}

impl CoarseSearch {
    /// Score-blend search over an exact index. Parameters are checked when a
    /// search runs, not here.
    ///
    /// # Arguments
    /// * `beta` - Weight of the title similarity, within `[0, 1]`; the chunk
    ///   mean gets `1 - beta`
    /// * `top_k` - Number of sections to keep, at least 1
    ///
    /// # Example
    /// ```
    /// use querydoc_retriever::{Section, SectionId};
    /// use querydoc_retriever::retrieval::CoarseSearch;
    ///
    /// let mut setup = Section::new(SectionId::new("manual", 0), "Setup", 1, 2);
    /// setup.title_emb = Some(vec![1.0, 0.0]);
    /// setup.avg_chunk_emb = Some(vec![0.9, 0.1]);
    /// let mut faq = Section::new(SectionId::new("manual", 1), "FAQ", 3, 3);
    /// faq.title_emb = Some(vec![0.0, 1.0]);
    /// faq.avg_chunk_emb = Some(vec![0.0, 1.0]);
    ///
    /// let sections = [setup, faq];
    /// let scored = CoarseSearch::new(0.3, 1).search(&[1.0, 0.0], &sections)?;
    /// assert_eq!(scored[0].section.title, "Setup");
    /// # Ok::<(), querydoc_retriever::RetrievalError>(())
    /// ```
    pub fn new(beta: f32, top_k: usize) -> Self {
        Self {
            beta,
            top_k,
            strategy: CoarseStrategy::default(),
            index: IndexKind::default(),
        }
    }

    pub fn with_strategy(self, strategy: CoarseStrategy) -> Self {
        Self { strategy, ..self }
    }

    pub fn with_index(self, index: IndexKind) -> Self {
        Self { index, ..self }
    }

    pub fn validate(&self) -> Result<()> {
        validate_beta(self.beta)?;
        check_top_k(self.top_k)?;
        self.index.validate()
    }

    /// Embed `query` once and rank `sections` against it.
    pub async fn search_text<'a>(
        &self,
        provider: &dyn EmbeddingProvider,
        query: &str,
        sections: &'a [Section],
    ) -> Result<Vec<ScoredSection<'a>>> {
        self.validate()?;
        let query_embedding = provider.embed_text(query).await?;
        self.search(&query_embedding, sections)
    }

    /// Rank `sections` against a precomputed query embedding, best first; ties
    /// keep section order.
    ///
    /// # Arguments
    /// * `query_embedding` - Query vector, of the sections' dimension
    /// * `sections` - Candidates; those missing a title or chunk-mean embedding
    ///   are skipped
    ///
    /// # Errors
    /// `InvalidParameter` for an out-of-range `beta`, `top_k` or index
    /// parameter, `DimensionMismatch` when a searchable section's embeddings
    /// differ in length from the query.
    pub fn search<'a>(
        &self,
        query_embedding: &[f32],
        sections: &'a [Section],
    ) -> Result<Vec<ScoredSection<'a>>> {
        self.validate()?;

        let eligible = eligible_sections(query_embedding, sections)?;
        tracing::debug!(
            "Coarse search over {} of {} sections",
            eligible.len(),
            sections.len()
        );
        if eligible.is_empty() {
            return Ok(Vec::new());
        }

        match self.strategy {
            CoarseStrategy::ScoreBlend => self.score_blend(query_embedding, eligible),
            CoarseStrategy::VectorBlend => self.vector_blend(query_embedding, eligible),
        }
    }

    fn score_blend<'a>(
        &self,
        query_embedding: &[f32],
        eligible: Vec<Eligible<'a>>,
    ) -> Result<Vec<ScoredSection<'a>>> {
        let title_similarity = similarities(query_embedding, eligible.iter().map(|e| e.title))?;
        let chunk_similarity = similarities(query_embedding, eligible.iter().map(|e| e.chunk_mean))?;

        let blended = (0..eligible.len()).map(|position| Neighbor {
            position,
            score: blend(self.beta, title_similarity[position], chunk_similarity[position]),
        });
        Ok(rank(blended, self.top_k)
            .into_iter()
            .map(|hit| ScoredSection {
                section: eligible[hit.position].section,
                score: hit.score,
                title_similarity: title_similarity[hit.position],
                chunk_similarity: chunk_similarity[hit.position],
            })
            .collect())
    }

    fn vector_blend<'a>(
        &self,
        query_embedding: &[f32],
        eligible: Vec<Eligible<'a>>,
    ) -> Result<Vec<ScoredSection<'a>>> {
        let beta = self.beta;
        let blended: Vec<Vec<f32>> = eligible
            .iter()
            .map(|e| {
                unit(e.title)
                    .into_iter()
                    .zip(unit(e.chunk_mean))
                    .map(|(t, c)| beta * t + (1.0 - beta) * c)
                    .collect()
            })
            .collect();

        let index = build_index(&self.index, blended, Metric::InnerProduct)?;
        let hits = index.query(&unit(query_embedding), self.top_k)?;

        let query_norm = norm(query_embedding);
        Ok(hits
            .into_iter()
            .map(|hit| {
                let section = eligible[hit.position];
                self.score_section(query_embedding, query_norm, section, Some(hit.score))
            })
            .collect())
    }

    fn score_section<'a>(
        &self,
        query: &[f32],
        query_norm: f32,
        eligible: Eligible<'a>,
        blended_score: Option<f32>,
    ) -> ScoredSection<'a> {
        let title_similarity = cosine_with_norms(query, query_norm, eligible.title, norm(eligible.title));
        let chunk_similarity =
            cosine_with_norms(query, query_norm, eligible.chunk_mean, norm(eligible.chunk_mean));
        let score = blended_score.unwrap_or_else(|| blend(self.beta, title_similarity, chunk_similarity));

        ScoredSection {
            section: eligible.section,
            score,
            title_similarity,
            chunk_similarity,
        }
    }
}

fn blend(beta: f32, title_similarity: f32, chunk_similarity: f32) -> f32 {
    beta * title_similarity + (1.0 - beta) * chunk_similarity + 0.0
}

/// Cosine of `query` against each vector, indexed by input position.
fn similarities<'v>(query: &[f32], vectors: impl Iterator<Item = &'v [f32]>) -> Result<Vec<f32>> {
    let index = ExactIndex::build(vectors.map(<[f32]>::to_vec).collect(), Metric::Cosine)?;
    let mut scores = vec![0.0; index.len()];
    for hit in index.query(query, index.len())? {
        scores[hit.position] = hit.score;
    }
    Ok(scores)
}

pub(crate) fn validate_beta(beta: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&beta) {
        return Err(RetrievalError::invalid_parameter(format!(
            "beta must be within [0, 1], got {beta}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct Eligible<'a> {
    section: &'a Section,
    title: &'a [f32],
    chunk_mean: &'a [f32],
}

fn eligible_sections<'a>(query: &[f32], sections: &'a [Section]) -> Result<Vec<Eligible<'a>>> {
    let mut eligible = Vec::with_capacity(sections.len());
    for section in sections {
        let Some((title, chunk_mean)) = section.representations() else {
            continue;
        };
        check_dimension(query.len(), title.len())?;
        check_dimension(query.len(), chunk_mean.len())?;
        eligible.push(Eligible {
            section,
            title,
            chunk_mean,
        });
    }
    Ok(eligible)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::SectionId;
    use crate::retrieval::hnsw::HnswParams;
    use crate::retrieval::similarity::cosine_similarity;

    fn section(ordinal: u32, title: &str, title_emb: Option<Vec<f32>>, avg: Option<Vec<f32>>) -> Section {
        let mut section = Section::new(SectionId::new("manual", ordinal), title, 1, 1);
        section.title_emb = title_emb;
        section.avg_chunk_emb = avg;
        section
    }

    /// Section A matches the query by title only, B by content only.
    fn title_vs_content() -> Vec<Section> {
        vec![
            section(0, "A", Some(vec![1.0, 0.0]), Some(vec![0.0, 1.0])),
            section(1, "B", Some(vec![0.0, 1.0]), Some(vec![1.0, 0.0])),
        ]
    }

    fn titles<'a>(scored: &[ScoredSection<'a>]) -> Vec<&'a str> {
        scored.iter().map(|s| s.section.title.as_str()).collect()
    }

    #[test]
    fn test_beta_extremes_invert_ranking() {
        let sections = title_vs_content();
        let query = [1.0, 0.0];

        let by_title = CoarseSearch::new(1.0, 2).search(&query, &sections).unwrap();
        assert_eq!(titles(&by_title), vec!["A", "B"]);

        let by_content = CoarseSearch::new(0.0, 2).search(&query, &sections).unwrap();
        assert_eq!(titles(&by_content), vec!["B", "A"]);
    }

    #[test]
    fn test_equal_blend_keeps_section_order() {
        let sections = title_vs_content();
        let scored = CoarseSearch::new(0.5, 2).search(&[1.0, 0.0], &sections).unwrap();

        assert_eq!(titles(&scored), vec!["A", "B"]);
        assert!((scored[0].score - scored[1].score).abs() < 1e-6);
        assert!((scored[0].title_similarity - 1.0).abs() < 1e-6);
        assert!(scored[0].chunk_similarity.abs() < 1e-6);
    }

    #[test]
    fn test_sections_without_representation_are_skipped() {
        let sections = vec![
            section(0, "Empty", Some(vec![1.0, 0.0]), None),
            section(1, "Untitled", None, Some(vec![1.0, 0.0])),
            section(2, "Full", Some(vec![0.0, 1.0]), Some(vec![0.0, 1.0])),
        ];

        let scored = CoarseSearch::new(0.3, 3).search(&[1.0, 0.0], &sections).unwrap();
        assert_eq!(titles(&scored), vec!["Full"]);
    }

    #[test]
    fn test_top_k_clamped_and_truncates() {
        let sections = title_vs_content();
        assert_eq!(CoarseSearch::new(0.3, 10).search(&[1.0, 0.0], &sections).unwrap().len(), 2);
        assert_eq!(CoarseSearch::new(0.3, 1).search(&[1.0, 0.0], &sections).unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_parameters() {
        let sections = title_vs_content();
        for beta in [-0.1, 1.5, f32::NAN] {
            assert!(matches!(
                CoarseSearch::new(beta, 1).search(&[1.0, 0.0], &sections),
                Err(RetrievalError::InvalidParameter(_))
            ));
        }
        assert!(matches!(
            CoarseSearch::new(0.3, 0).search(&[1.0, 0.0], &sections),
            Err(RetrievalError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_dimension_mismatch() {
        let sections = title_vs_content();
        assert!(matches!(
            CoarseSearch::new(0.3, 1).search(&[1.0, 0.0, 0.0], &sections),
            Err(RetrievalError::DimensionMismatch {
                expected: 3,
                found: 2
            })
        ));
    }

    #[test]
    fn test_vector_blend_matches_score_blend() {
        let sections: Vec<Section> = (0..30u32)
            .map(|i| {
                let f = i as f32;
                section(
                    i,
                    &format!("S{i}"),
                    Some(vec![f.sin(), f.cos(), 0.5 + f * 0.01]),
                    Some(vec![(f * 0.7).cos(), 1.0 - f * 0.02, (f * 1.3).sin()]),
                )
            })
            .collect();
        let query = [0.3, -0.4, 0.9];

        for beta in [0.0, 0.3, 0.7, 1.0] {
            let score = CoarseSearch::new(beta, 5).search(&query, &sections).unwrap();
            let vector = CoarseSearch::new(beta, 5)
                .with_strategy(CoarseStrategy::VectorBlend)
                .search(&query, &sections)
                .unwrap();

            assert_eq!(titles(&score), titles(&vector), "beta = {beta}");
            for (a, b) in score.iter().zip(&vector) {
                assert!((a.score - b.score).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn test_vector_blend_over_hnsw() {
        let sections = title_vs_content();
        let scored = CoarseSearch::new(1.0, 2)
            .with_strategy(CoarseStrategy::VectorBlend)
            .with_index(IndexKind::Hnsw(HnswParams::default()))
            .search(&[1.0, 0.0], &sections)
            .unwrap();
        assert_eq!(titles(&scored), vec!["A", "B"]);
    }

    #[test]
    fn test_zero_query_ties_keep_section_order() {
        let sections = vec![
            section(0, "Down", Some(vec![-1.0, -1.0]), Some(vec![-1.0, -1.0])),
            section(1, "Up", Some(vec![1.0, 1.0]), Some(vec![1.0, 1.0])),
        ];

        for strategy in [CoarseStrategy::ScoreBlend, CoarseStrategy::VectorBlend] {
            let scored = CoarseSearch::new(0.3, 2)
                .with_strategy(strategy)
                .search(&[0.0, 0.0], &sections)
                .unwrap();
            assert_eq!(titles(&scored), vec!["Down", "Up"], "{strategy:?}");
            assert!(scored.iter().all(|s| s.score == 0.0));
        }
    }

    #[test]
    fn test_score_blend_matches_direct_cosine() {
        let sections = title_vs_content();
        let query = [0.6, 0.8];
        let scored = CoarseSearch::new(0.3, 2).search(&query, &sections).unwrap();

        for s in &scored {
            let title = cosine_similarity(&query, s.section.title_emb.as_deref().unwrap());
            let chunk = cosine_similarity(&query, s.section.avg_chunk_emb.as_deref().unwrap());
            assert_eq!(s.title_similarity, title);
            assert_eq!(s.chunk_similarity, chunk);
            assert!((s.score - (0.3 * title + 0.7 * chunk)).abs() < 1e-6);
        }
        // A: 0.3 * 0.6 + 0.7 * 0.8, B: 0.3 * 0.8 + 0.7 * 0.6
        assert_eq!(titles(&scored), vec!["A", "B"]);
    }

    #[test]
    fn test_no_eligible_sections() {
        let sections = vec![section(0, "Bare", None, None)];
        let scored = CoarseSearch::new(0.3, 3).search(&[1.0], &sections).unwrap();
        assert!(scored.is_empty());
    }
}
