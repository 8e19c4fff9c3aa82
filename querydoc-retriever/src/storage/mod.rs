//! Persistence for ingested documents.
//!
//! A document is stored as one unit: its record, its sections with their
//! representations, and its embedded chunks. Saving a document replaces any
//! previous version with the same id, and deleting it removes everything that
//! belongs to it.
//!
//! ```text
//! documents ─┬─ sections (document_id, ordinal)
//!            └─ chunks   (document_id, section_ordinal)
//! ```

use crate::config::ChunkingConfig;
use crate::document::{Corpus, DocumentId, DocumentIndex};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

pub mod sqlite_store;

pub use sqlite_store::{DATABASE_FILE, SqliteStore};

/// Hex blake3 digest of everything a stored document is derived from: the
/// extraction input, the embedding model id and the chunking settings. An
/// unchanged digest means re-ingesting would store the same document.
pub fn ingest_hash(input: &[u8], model: &str, chunking: &ChunkingConfig) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in [input, model.as_bytes()] {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    hasher.update(&(chunking.max_chunk_length as u64).to_le_bytes());
    hasher.update(&[u8::from(chunking.clean_whitespace)]);
    hex::encode(hasher.finalize().as_bytes())
}

/// Summary of a stored document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub content_hash: String,
    /// Id of the embedding model the document was embedded with
    pub model: String,
    pub section_count: usize,
    pub chunk_count: usize,
    /// Embedding dimensionality of the document's chunks
    pub dimension: usize,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub documents: usize,
    pub sections: usize,
    /// Sections with both a title and a chunk-mean embedding
    pub searchable_sections: usize,
    pub chunks: usize,
    /// `None` for an empty store
    pub dimension: Option<usize>,
    /// `None` for an in-memory store
    pub database_path: Option<PathBuf>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Store `document`, replacing any document with the same id, in one
    /// transaction. `model` is the id of the model that embedded it.
    async fn save_document(&self, document: &DocumentIndex, content_hash: &str, model: &str)
        -> Result<DocumentRecord>;

    async fn load_document(&self, id: &str) -> Result<Option<DocumentIndex>>;

    /// All documents in insertion order.
    async fn list_documents(&self) -> Result<Vec<DocumentRecord>>;

    /// Returns whether a document was deleted.
    async fn delete_document(&self, id: &str) -> Result<bool>;

    /// Content hash recorded when the document was saved.
    async fn document_hash(&self, id: &str) -> Result<Option<String>>;

    /// Merge the given documents, or all of them, into one corpus in insertion
    /// order. Unknown ids are an error.
    async fn load_corpus(&self, ids: Option<&[DocumentId]>) -> Result<Corpus>;

    /// Fail unless the given documents, or all of them, were embedded with
    /// `model`. Query embeddings from another model are not comparable.
    async fn ensure_model(&self, ids: Option<&[DocumentId]>, model: &str) -> Result<()>;

    async fn stats(&self) -> Result<StoreStats>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_hash_covers_model_and_chunking() {
        let input = b"{\"pages_text\": []}";
        let chunking = ChunkingConfig::default();
        let hash = ingest_hash(input, "model-a", &chunking);
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, ingest_hash(input, "model-a", &chunking));

        assert_ne!(hash, ingest_hash(b"{\"pages_text\": [\"a\"]}", "model-a", &chunking));
        assert_ne!(hash, ingest_hash(input, "model-b", &chunking));
        let shorter = ChunkingConfig {
            max_chunk_length: 400,
            ..chunking.clone()
        };
        assert_ne!(hash, ingest_hash(input, "model-a", &shorter));
        let raw = ChunkingConfig {
            clean_whitespace: false,
            ..chunking
        };
        assert_ne!(hash, ingest_hash(input, "model-a", &raw));
    }
}
