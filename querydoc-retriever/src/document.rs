//! Data model shared by ingestion, retrieval and storage.
//!
//! A document is split into [`Section`]s (from its table of contents) and
//! [`Chunk`]s (contiguous spans of section text). Every chunk carries the
//! [`SectionId`] of the section it came from; sections and chunks are joined by
//! that id only, never by title. Several documents merge into one [`Corpus`],
//! which is immutable once built and shared between concurrent searches.

use crate::error::{Result, RetrievalError, check_dimension};
use crate::retrieval::embed_batch;
use querydoc_embed::EmbeddingProvider;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

pub type DocumentId = String;

/// Generated section identifier, unique across a merged corpus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SectionId {
    pub document: DocumentId,
    /// Position of the section's entry in the document's table of contents
    pub ordinal: u32,
}

impl SectionId {
    pub fn new(document: impl Into<DocumentId>, ordinal: u32) -> Self {
        Self {
            document: document.into(),
            ordinal,
        }
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.document, self.ordinal)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: SectionId,
    pub title: String,
    /// Table of contents nesting level, 1 for top-level entries
    pub level: u32,
    pub start_page: u32,
    pub end_page: u32,
    pub title_emb: Option<Vec<f32>>,
    /// Mean of the embeddings of the chunks in this section, `None` without chunks
    pub avg_chunk_emb: Option<Vec<f32>>,
}

impl Section {
    pub fn new(id: SectionId, title: impl Into<String>, start_page: u32, end_page: u32) -> Self {
        Self {
            id,
            title: title.into(),
            level: 1,
            start_page,
            end_page,
            title_emb: None,
            avg_chunk_emb: None,
        }
    }

    pub fn with_level(self, level: u32) -> Self {
        Self { level, ..self }
    }

    /// Title and chunk-mean embeddings, or `None` unless both are present.
    /// Only sections with both can be scored.
    pub fn representations(&self) -> Option<(&[f32], &[f32])> {
        Some((self.title_emb.as_deref()?, self.avg_chunk_emb.as_deref()?))
    }
}

/// A chunk before its content has been embedded.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChunk {
    pub section_id: SectionId,
    pub section_title: String,
    pub content: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub section_id: SectionId,
    pub section_title: String,
    pub content: String,
    /// Free-form details such as page range and sequence number
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub embedding: Vec<f32>,
}

impl Chunk {
    pub fn from_pending(pending: PendingChunk, embedding: Vec<f32>) -> Self {
        Self {
            section_id: pending.section_id,
            section_title: pending.section_title,
            content: pending.content,
            metadata: pending.metadata,
            embedding,
        }
    }
}

/// Ordered chunks with one embedding dimensionality.
///
/// Order carries no meaning for relevance but is the tie-break order of every
/// ranking over the index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkIndex {
    chunks: Vec<Chunk>,
    dimension: Option<usize>,
}

impl ChunkIndex {
    /// Fails with [`RetrievalError::DimensionMismatch`] if embeddings differ in length.
    pub fn new(chunks: Vec<Chunk>) -> Result<Self> {
        let dimension = chunks.first().map(|c| c.embedding.len());
        if let Some(expected) = dimension {
            for chunk in &chunks {
                check_dimension(expected, chunk.embedding.len())?;
            }
        }
        Ok(Self { chunks, dimension })
    }

    /// Embed all pending chunks with a single batch call and build the index.
    pub async fn embed(provider: &dyn EmbeddingProvider, pending: Vec<PendingChunk>) -> Result<Self> {
        let contents: Vec<String> = pending.iter().map(|c| c.content.clone()).collect();
        let embeddings = embed_batch(provider, &contents).await?;

        let chunks = pending
            .into_iter()
            .zip(embeddings)
            .map(|(pending, embedding)| Chunk::from_pending(pending, embedding))
            .collect();
        Self::new(chunks)
    }

    /// Concatenate indexes in order.
    pub fn merge(indexes: impl IntoIterator<Item = ChunkIndex>) -> Result<Self> {
        let chunks = indexes.into_iter().flat_map(|index| index.chunks).collect();
        Self::new(chunks)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Embedding dimensionality, `None` for an empty index.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Chunk> {
        self.chunks.iter()
    }

    pub fn as_slice(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn into_chunks(self) -> Vec<Chunk> {
        self.chunks
    }
}

impl<'a> IntoIterator for &'a ChunkIndex {
    type Item = &'a Chunk;
    type IntoIter = std::slice::Iter<'a, Chunk>;

    fn into_iter(self) -> Self::IntoIter {
        self.chunks.iter()
    }
}

/// Sections and chunks of one document, the unit of persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentIndex {
    pub id: DocumentId,
    pub sections: Vec<Section>,
    pub chunks: ChunkIndex,
}

/// Sections and chunks of one or more documents, validated and immutable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Corpus {
    documents: Vec<DocumentId>,
    sections: Vec<Section>,
    chunks: ChunkIndex,
}

impl Corpus {
    /// Validates that section ids are unique and that every section embedding has
    /// the chunk dimensionality.
    pub fn new(sections: Vec<Section>, chunks: ChunkIndex) -> Result<Self> {
        let mut seen = HashSet::with_capacity(sections.len());
        let mut documents: Vec<DocumentId> = Vec::new();
        let mut dimension = chunks.dimension();

        for section in &sections {
            if !seen.insert(&section.id) {
                return Err(RetrievalError::DuplicateSection(section.id.clone()));
            }
            if !documents.contains(&section.id.document) {
                documents.push(section.id.document.clone());
            }
            for embedding in [&section.title_emb, &section.avg_chunk_emb].into_iter().flatten() {
                match dimension {
                    Some(expected) => check_dimension(expected, embedding.len())?,
                    None => dimension = Some(embedding.len()),
                }
            }
        }

        Ok(Self {
            documents,
            sections,
            chunks,
        })
    }

    /// Merge documents in the given order.
    pub fn from_documents(documents: impl IntoIterator<Item = DocumentIndex>) -> Result<Self> {
        let mut sections = Vec::new();
        let mut indexes = Vec::new();
        for document in documents {
            sections.extend(document.sections);
            indexes.push(document.chunks);
        }
        Self::new(sections, ChunkIndex::merge(indexes)?)
    }

    pub fn documents(&self) -> &[DocumentId] {
        &self.documents
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn chunks(&self) -> &ChunkIndex {
        &self.chunks
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty() && self.chunks.is_empty()
    }
}

/// Shared, swappable corpus.
///
/// Searches take a snapshot and keep using it even if a freshly built corpus
/// is swapped in meanwhile.
#[derive(Debug, Default)]
pub struct CorpusHandle {
    current: RwLock<Arc<Corpus>>,
}

impl CorpusHandle {
    pub fn new(corpus: Corpus) -> Self {
        Self {
            current: RwLock::new(Arc::new(corpus)),
        }
    }

    pub async fn snapshot(&self) -> Arc<Corpus> {
        Arc::clone(&*self.current.read().await)
    }

    /// Install `corpus`, returning the one it replaces.
    pub async fn replace(&self, corpus: Corpus) -> Arc<Corpus> {
        let mut guard = self.current.write().await;
        std::mem::replace(&mut *guard, Arc::new(corpus))
    }
}
