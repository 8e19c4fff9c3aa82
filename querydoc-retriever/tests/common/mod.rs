//! Shared test doubles and fixtures.

#![allow(dead_code)]

use async_trait::async_trait;
use querydoc_embed::{EmbedError, EmbeddingProvider, EmbeddingResult, Result as EmbedResult};
use querydoc_retriever::ingest::{ExtractedDocument, TocEntry};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const INSTALL_QUESTION: &str = "How do I install it?";

/// Embeds texts by exact lookup and counts provider calls. Unknown texts are an error.
pub struct LookupProvider {
    table: HashMap<String, Vec<f32>>,
    dimension: usize,
    single_calls: AtomicUsize,
    batch_calls: AtomicUsize,
}

impl LookupProvider {
    pub fn new<'a>(entries: impl IntoIterator<Item = (&'a str, Vec<f32>)>) -> Self {
        let table: HashMap<String, Vec<f32>> = entries
            .into_iter()
            .map(|(text, embedding)| (text.to_string(), embedding))
            .collect();
        let dimension = table.values().next().map_or(0, Vec::len);
        Self {
            table,
            dimension,
            single_calls: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
        }
    }

    /// The manual used across the scenarios: Introduction, Setup, FAQ and an
    /// Appendix whose page is blank.
    pub fn manual() -> Self {
        Self::new([
            ("Introduction", vec![1.0, 0.0, 0.0]),
            ("Setup", vec![0.0, 1.0, 0.0]),
            ("FAQ", vec![0.0, 0.0, 1.0]),
            ("Appendix", vec![0.0, 1.0, 0.0]),
            ("Welcome to the product.", vec![0.9, 0.1, 0.0]),
            ("Install the package with the installer.", vec![0.1, 0.9, 0.1]),
            ("Frequently asked questions about licensing.", vec![0.0, 0.2, 0.9]),
            (INSTALL_QUESTION, vec![0.1, 1.0, 0.0]),
            ("What is the license?", vec![0.0, 0.1, 1.0]),
        ])
    }

    pub fn single_calls(&self) -> usize {
        self.single_calls.load(Ordering::SeqCst)
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    fn lookup(&self, text: &str) -> EmbedResult<Vec<f32>> {
        self.table
            .get(text)
            .cloned()
            .ok_or_else(|| EmbedError::invalid_input(format!("no embedding for {text:?}")))
    }
}

#[async_trait]
impl EmbeddingProvider for LookupProvider {
    async fn embed_text(&self, text: &str) -> EmbedResult<Vec<f32>> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        self.lookup(text)
    }

    async fn embed_texts(&self, texts: &[String]) -> EmbedResult<EmbeddingResult> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        let embeddings = texts
            .iter()
            .map(|text| self.lookup(text))
            .collect::<EmbedResult<Vec<_>>>()?;
        Ok(EmbeddingResult::new(embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "lookup"
    }
}

fn entry(title: &str, page: i64) -> TocEntry {
    TocEntry {
        level: 1,
        title: title.to_string(),
        page,
    }
}

/// Four pages, one per section; the Appendix page is blank.
pub fn manual_extraction() -> ExtractedDocument {
    ExtractedDocument {
        document: Some("manual".to_string()),
        toc: vec![
            entry("Introduction", 1),
            entry("Setup", 2),
            entry("FAQ", 3),
            entry("Appendix", 4),
        ],
        pages_text: vec![
            "Welcome to the\nproduct.".to_string(),
            "Install the package   with the installer.".to_string(),
            "Frequently asked questions about licensing.".to_string(),
            "\n\n".to_string(),
        ],
    }
}
