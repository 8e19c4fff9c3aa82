//! The retrieval orchestrator: embed the query once, rank sections, then rank
//! chunks inside the chosen sections.

use crate::config::{RetrievalConfig, RetrievalMode};
use crate::document::{Chunk, ChunkIndex, Corpus, Section};
use crate::error::Result;
use crate::retrieval::coarse_search::{CoarseSearch, ScoredSection};
use crate::retrieval::fine_search::{ScoredChunk, fine_search, flat_search};
use crate::retrieval::vector_index::IndexKind;
use querydoc_embed::EmbeddingProvider;
use serde::Serialize;
use std::sync::Arc;

/// Outcome of one retrieval: the sections the coarse stage picked (empty in
/// flat mode) and the ranked chunks.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Retrieval<'a> {
    pub sections: Vec<ScoredSection<'a>>,
    pub chunks: Vec<ScoredChunk<'a>>,
}

impl<'a> Retrieval<'a> {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Ranked chunks without their scores.
    pub fn chunk_refs(&self) -> Vec<&'a Chunk> {
        self.chunks.iter().map(|scored| scored.chunk).collect()
    }
}

/// Runs retrievals against any corpus with one embedding provider.
///
/// Holds no corpus state, so one retriever can serve concurrent requests over
/// shared corpus snapshots.
#[derive(Clone)]
pub struct Retriever {
    provider: Arc<dyn EmbeddingProvider>,
    config: RetrievalConfig,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("provider", &self.provider.provider_name())
            .field("config", &self.config)
            .finish()
    }
}

impl Retriever {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: RetrievalConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { provider, config })
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        Ok(self.provider.embed_text(query).await?)
    }

    /// Embed `query` and retrieve from `corpus` in the configured mode.
    pub async fn retrieve<'a>(&self, query: &str, corpus: &'a Corpus) -> Result<Retrieval<'a>> {
        let query_embedding = self.embed_query(query).await?;
        self.retrieve_embedded(&query_embedding, corpus)
    }

    /// Retrieve with an already embedded query.
    pub fn retrieve_embedded<'a>(
        &self,
        query_embedding: &[f32],
        corpus: &'a Corpus,
    ) -> Result<Retrieval<'a>> {
        match self.config.mode {
            RetrievalMode::Hierarchical => two_stage(
                query_embedding,
                corpus.sections(),
                corpus.chunks(),
                &self.config.coarse_search(),
                self.config.top_chunks,
                &self.config.index,
            ),
            RetrievalMode::Flat => Ok(Retrieval {
                sections: Vec::new(),
                chunks: flat_search(
                    query_embedding,
                    corpus.chunks(),
                    self.config.top_chunks,
                    &self.config.index,
                )?,
            }),
        }
    }
}

/// Two-stage retrieval over loose sections and chunks, returning the ranked
/// chunks only. The query is embedded exactly once.
pub async fn retrieve<'a>(
    provider: &dyn EmbeddingProvider,
    query: &str,
    sections: &'a [Section],
    chunks: &'a ChunkIndex,
    beta: f32,
    top_sections: usize,
    top_chunks: usize,
) -> Result<Vec<&'a Chunk>> {
    let coarse = CoarseSearch::new(beta, top_sections);
    coarse.validate()?;
    crate::error::check_top_k(top_chunks)?;

    let query_embedding = provider.embed_text(query).await?;
    let retrieval = two_stage(
        &query_embedding,
        sections,
        chunks,
        &coarse,
        top_chunks,
        &IndexKind::Exact,
    )?;
    Ok(retrieval.chunk_refs())
}

fn two_stage<'a>(
    query_embedding: &[f32],
    sections: &'a [Section],
    chunks: &'a ChunkIndex,
    coarse: &CoarseSearch,
    top_chunks: usize,
    index: &IndexKind,
) -> Result<Retrieval<'a>> {
    let selected = coarse.search(query_embedding, sections)?;
    if selected.is_empty() {
        tracing::debug!("No sections selected, skipping fine search");
        return Ok(Retrieval::default());
    }

    let chunks = fine_search(
        query_embedding,
        chunks,
        selected.iter().map(|scored| &scored.section.id),
        top_chunks,
        index,
    )?;
    tracing::debug!(
        "Retrieved {} chunks from {} sections",
        chunks.len(),
        selected.len()
    );

    Ok(Retrieval {
        sections: selected,
        chunks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::SectionId;
    use crate::error::RetrievalError;
    use async_trait::async_trait;
    use querydoc_embed::{EmbeddingResult, Result as EmbedResult};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    /// Maps "title" queries to `[1, 0]`, everything else to `[0, 1]`.
    #[derive(Default)]
    struct AxisProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for AxisProvider {
        async fn embed_text(&self, text: &str) -> EmbedResult<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(if text.contains("title") {
                vec![1.0, 0.0]
            } else {
                vec![0.0, 1.0]
            })
        }

        async fn embed_texts(&self, texts: &[String]) -> EmbedResult<EmbeddingResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(EmbeddingResult::new(
                texts.iter().map(|_| vec![1.0, 0.0]).collect(),
            ))
        }

        fn embedding_dimension(&self) -> usize {
            2
        }

        fn provider_name(&self) -> &str {
            "axis"
        }
    }

    fn corpus() -> Corpus {
        let a = SectionId::new("doc", 0);
        let b = SectionId::new("doc", 1);
        let mut sa = Section::new(a.clone(), "A", 1, 1);
        sa.title_emb = Some(vec![1.0, 0.0]);
        sa.avg_chunk_emb = Some(vec![0.0, 1.0]);
        let mut sb = Section::new(b.clone(), "B", 2, 2);
        sb.title_emb = Some(vec![0.0, 1.0]);
        sb.avg_chunk_emb = Some(vec![1.0, 0.0]);

        let chunk = |id: &SectionId, content: &str, embedding: Vec<f32>| Chunk {
            section_id: id.clone(),
            section_title: String::new(),
            content: content.to_string(),
            metadata: serde_json::Map::new(),
            embedding,
        };
        let chunks = ChunkIndex::new(vec![
            chunk(&a, "a1", vec![0.0, 1.0]),
            chunk(&b, "b1", vec![1.0, 0.0]),
            chunk(&a, "a2", vec![0.2, 1.0]),
        ])
        .unwrap();
        Corpus::new(vec![sa, sb], chunks).unwrap()
    }

    #[tokio::test]
    async fn test_hierarchical_retrieval() {
        let provider = Arc::new(AxisProvider::default());
        let config = RetrievalConfig::default().with_beta(1.0).with_top_sections(1);
        let retriever = Retriever::new(provider.clone(), config).unwrap();
        let corpus = corpus();

        let result = retriever.retrieve("title query", &corpus).await.unwrap();
        assert_eq!(result.sections.len(), 1);
        assert_eq!(result.sections[0].section.title, "A");
        let contents: Vec<&str> = result.chunks.iter().map(|c| c.chunk.content.as_str()).collect();
        assert_eq!(contents, vec!["a2", "a1"]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_flat_retrieval_skips_sections() {
        let provider = Arc::new(AxisProvider::default());
        let config = RetrievalConfig::default()
            .with_mode(RetrievalMode::Flat)
            .with_top_chunks(1);
        let retriever = Retriever::new(provider, config).unwrap();
        let corpus = corpus();

        let result = retriever.retrieve("title query", &corpus).await.unwrap();
        assert!(result.sections.is_empty());
        assert_eq!(result.chunk_refs()[0].content, "b1");
    }

    #[tokio::test]
    async fn test_free_function() {
        let provider = AxisProvider::default();
        let corpus = corpus();

        let chunks = retrieve(
            &provider,
            "content query",
            corpus.sections(),
            corpus.chunks(),
            0.0,
            1,
            5,
        )
        .await
        .unwrap();
        // beta = 0 ranks A first by its chunk mean, so only A's chunks come back
        let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["a1", "a2"]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_embedding() {
        let provider = AxisProvider::default();
        let corpus = corpus();
        let result = retrieve(&provider, "q", corpus.sections(), corpus.chunks(), 2.0, 1, 1).await;
        assert!(matches!(result, Err(RetrievalError::InvalidParameter(_))));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);

        assert!(Retriever::new(
            Arc::new(AxisProvider::default()),
            RetrievalConfig::default().with_top_chunks(0)
        )
        .is_err());
    }

    #[traced_test]
    #[tokio::test]
    async fn test_no_searchable_sections_skips_fine_search() {
        let provider = AxisProvider::default();
        let corpus = corpus();
        // Titles only, no chunk means
        let sections: Vec<Section> = corpus
            .sections()
            .iter()
            .cloned()
            .map(|mut section| {
                section.avg_chunk_emb = None;
                section
            })
            .collect();

        let chunks = retrieve(&provider, "title query", &sections, corpus.chunks(), 0.5, 2, 5)
            .await
            .unwrap();
        assert!(chunks.is_empty());
        assert!(logs_contain("No sections selected, skipping fine search"));
    }
}
