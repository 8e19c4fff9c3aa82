//! Turns a PDF extraction result into a searchable [`DocumentIndex`].
//!
//! The extraction JSON is what the PDF extractor writes:
//!
//! ```json
//! {
//!   "document": "manual",
//!   "toc": [[1, "Introduction", 1], [1, "Setup", 3]],
//!   "pages_text": ["page one", "page two", "page three"]
//! }
//! ```
//!
//! Table of contents entries become sections spanning the pages up to the next
//! entry. Each section's text is cleaned, chunked, embedded in one batch, and
//! finally the section representations are built from titles and chunk means.

use crate::config::ChunkingConfig;
use crate::document::{ChunkIndex, DocumentId, DocumentIndex, PendingChunk, Section, SectionId};
use crate::error::{Result, RetrievalError};
use crate::retrieval::build_section_representations;
use anyhow::Context;
use querydoc_context::{SectionChunker, clean_text, join_pages};
use querydoc_embed::EmbeddingProvider;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedDocument {
    /// Document name recorded by the extractor, if any
    #[serde(default)]
    pub document: Option<String>,
    #[serde(default)]
    pub toc: Vec<TocEntry>,
    pub pages_text: Vec<String>,
}

impl ExtractedDocument {
    pub fn from_json(contents: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_json(&contents).with_context(|| format!("Invalid extraction file {}", path.display()))
    }

    pub fn page_count(&self) -> u32 {
        u32::try_from(self.pages_text.len()).unwrap_or(u32::MAX)
    }
}

/// One table of contents line, serialized as `[level, title, page]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(u32, String, i64)", into = "(u32, String, i64)")]
pub struct TocEntry {
    pub level: u32,
    pub title: String,
    /// 1-based start page as reported by the extractor; may be out of range
    pub page: i64,
}

impl From<(u32, String, i64)> for TocEntry {
    fn from((level, title, page): (u32, String, i64)) -> Self {
        Self { level, title, page }
    }
}

impl From<TocEntry> for (u32, String, i64) {
    fn from(entry: TocEntry) -> Self {
        (entry.level, entry.title, entry.page)
    }
}

/// Sections for a document with `page_count` pages.
///
/// Entries are ordered by start page, keeping table of contents order for equal
/// pages; ordinals are the entries' table of contents positions. Each section
/// runs until the page before the next one starts (at least its own start page)
/// and the last one runs to the final page. Pages are clamped to
/// `1..=page_count`. An empty table of contents gives a single section named
/// after the document.
pub fn plan_sections(document_id: &str, toc: &[TocEntry], page_count: u32) -> Vec<Section> {
    let last_page = page_count.max(1);
    let clamp = |page: i64| page.clamp(1, i64::from(last_page)) as u32;

    if toc.is_empty() {
        return vec![Section::new(SectionId::new(document_id, 0), document_id, 1, last_page)];
    }

    let mut entries: Vec<(u32, &TocEntry, u32)> = toc
        .iter()
        .enumerate()
        .map(|(ordinal, entry)| (ordinal as u32, entry, clamp(entry.page)))
        .collect();
    entries.sort_by_key(|&(_, _, start)| start);

    entries
        .iter()
        .enumerate()
        .map(|(i, &(ordinal, entry, start))| {
            let end = match entries.get(i + 1) {
                Some(&(_, _, next_start)) => start.max(next_start.saturating_sub(1)),
                None => last_page,
            };
            let title = match entry.title.trim() {
                "" => {
                    warn!("Table of contents entry {} has no title", ordinal);
                    format!("Section {}", ordinal + 1)
                }
                trimmed => trimmed.to_string(),
            };
            Section::new(SectionId::new(document_id, ordinal), title, start, end).with_level(entry.level)
        })
        .collect()
}

/// Builds document indexes with one embedding provider and chunker.
pub struct IngestPipeline {
    provider: Arc<dyn EmbeddingProvider>,
    chunker: SectionChunker,
    clean_whitespace: bool,
}

impl IngestPipeline {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, chunking: &ChunkingConfig) -> anyhow::Result<Self> {
        chunking.validate()?;
        let chunker = SectionChunker::with_defaults(chunking.max_chunk_length)
            .context("Failed to compile chunk delimiters")?;
        Ok(Self {
            provider,
            chunker,
            clean_whitespace: chunking.clean_whitespace,
        })
    }

    /// Split every section's pages into pending chunks, in section order.
    pub fn chunk_sections(&self, sections: &[Section], pages: &[String]) -> Vec<PendingChunk> {
        let mut pending = Vec::new();
        for section in sections {
            let first = (section.start_page as usize).saturating_sub(1).min(pages.len());
            let last = (section.end_page as usize).min(pages.len());
            let raw = join_pages(pages[first..last.max(first)].iter().map(String::as_str));
            let text = if self.clean_whitespace {
                clean_text(&raw)
            } else {
                raw
            };

            let chunks = self.chunker.chunk(&text);
            if chunks.is_empty() {
                warn!("Section '{}' ({}) has no text", section.title, section.id);
            }
            pending.extend(chunks.into_iter().map(|chunk| {
                let mut metadata = serde_json::Map::new();
                metadata.insert("start_page".into(), json!(section.start_page));
                metadata.insert("end_page".into(), json!(section.end_page));
                metadata.insert("sequence".into(), json!(chunk.sequence));
                PendingChunk {
                    section_id: section.id.clone(),
                    section_title: section.title.clone(),
                    content: chunk.text,
                    metadata,
                }
            }));
        }
        pending
    }

    pub async fn ingest(&self, document_id: &str, document: &ExtractedDocument) -> Result<DocumentIndex> {
        if document_id.trim().is_empty() {
            return Err(RetrievalError::invalid_parameter("document id must not be empty"));
        }

        let sections = plan_sections(document_id, &document.toc, document.page_count());
        let pending = self.chunk_sections(&sections, &document.pages_text);
        if pending.is_empty() {
            return Err(RetrievalError::EmptyIndex);
        }
        info!(
            "Ingesting '{}': {} pages, {} sections, {} chunks",
            document_id,
            document.pages_text.len(),
            sections.len(),
            pending.len()
        );

        let chunks = ChunkIndex::embed(self.provider.as_ref(), pending).await?;
        let sections = build_section_representations(self.provider.as_ref(), &sections, &chunks).await?;

        Ok(DocumentIndex {
            id: DocumentId::from(document_id),
            sections,
            chunks,
        })
    }
}
