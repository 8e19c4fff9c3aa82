//! querydoc-retriever: hierarchical retrieval over long documents
//!
//! Documents are split into sections from their table of contents and into
//! chunks of section text. A question is answered in two stages: sections are
//! ranked by a blend of title similarity and mean-chunk similarity, then only
//! the chunks of the best sections are ranked against the question.
//!
//! ## Key Modules
//!
//! - **[`document`]**: Sections, chunks, corpora and the shared corpus handle
//! - **[`retrieval`]**: Vector indexes, section representations, coarse and fine search
//! - **[`ingest`]**: Extraction JSON to embedded sections and chunks
//! - **[`storage`]**: SQLite persistence of ingested documents
//! - **[`config`]**: `querydoc.toml` settings
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use querydoc_embed::{EmbedConfig, FastEmbedProvider};
//! use querydoc_retriever::{
//!     config::RetrievalConfig,
//!     retrieval::Retriever,
//!     storage::{DocumentStore, SqliteStore},
//! };
//! use std::{path::Path, sync::Arc};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = SqliteStore::open(Path::new(".")).await?;
//! let corpus = store.load_corpus(None).await?;
//!
//! let provider = Arc::new(FastEmbedProvider::create(EmbedConfig::default()).await?);
//! let retriever = Retriever::new(provider, RetrievalConfig::default())?;
//! let result = retriever.retrieve("How do I install it?", &corpus).await?;
//! for scored in &result.chunks {
//!     println!("{:.3} [{}] {}", scored.score, scored.chunk.section_title, scored.chunk.content);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! extraction JSON → IngestPipeline → DocumentIndex → SqliteStore
//!                                                        ↓
//! question → Retriever (coarse → fine) ← Corpus ← load_corpus
//! ```

pub mod config;
pub mod document;
pub mod error;
pub mod ingest;
pub mod retrieval;
pub mod storage;

pub use config::{QueryDocConfig, RetrievalConfig, RetrievalMode};
pub use document::{Chunk, ChunkIndex, Corpus, CorpusHandle, DocumentId, DocumentIndex, Section, SectionId};
pub use error::{Result, RetrievalError};
pub use ingest::{ExtractedDocument, IngestPipeline, TocEntry};
pub use retrieval::{Retrieval, Retriever};
