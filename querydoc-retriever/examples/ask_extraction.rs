//! Ingests an extraction JSON into an in-memory store and answers one question,
//! printing the coarse and fine stages side by side with flat retrieval.
//!
//! Run with:
//! cargo run -p querydoc-retriever --example ask_extraction -- manual.json "How do I install it?"

use anyhow::{Context, Result};
use querydoc_embed::{DEFAULT_MODEL_NAME, EmbedConfig, EmbeddingProvider, FastEmbedProvider};
use querydoc_retriever::{
    RetrievalConfig, RetrievalMode, Retriever,
    config::ChunkingConfig,
    ingest::{ExtractedDocument, IngestPipeline},
    storage::{DocumentStore, SqliteStore, ingest_hash},
};
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("querydoc_retriever=info")
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let input = PathBuf::from(args.next().context("usage: ask_extraction <extraction.json> <question>")?);
    let question = args.next().context("missing question")?;

    let extraction = ExtractedDocument::from_path(&input)?;
    let document_id = extraction
        .document
        .clone()
        .unwrap_or_else(|| "document".to_string());

    println!("🔧 Loading embedding model...");
    let provider: Arc<dyn EmbeddingProvider> = Arc::new(FastEmbedProvider::create(EmbedConfig::default()).await?);

    println!("📄 Ingesting '{document_id}' ({} pages)", extraction.page_count());
    let pipeline = IngestPipeline::new(Arc::clone(&provider), &ChunkingConfig::default())?;
    let index = pipeline.ingest(&document_id, &extraction).await?;

    let store = SqliteStore::open_memory().await?;
    let hash = ingest_hash(
        serde_json::to_string(&extraction)?.as_bytes(),
        DEFAULT_MODEL_NAME,
        &ChunkingConfig::default(),
    );
    let record = store.save_document(&index, &hash, DEFAULT_MODEL_NAME).await?;
    println!(
        "   ✓ {} sections, {} chunks, dimension {}",
        record.section_count, record.chunk_count, record.dimension
    );

    let corpus = store.load_corpus(None).await?;
    println!("\n❓ {question}");

    for mode in [RetrievalMode::Hierarchical, RetrievalMode::Flat] {
        let retriever = Retriever::new(Arc::clone(&provider), RetrievalConfig::default().with_mode(mode))?;
        let result = retriever.retrieve(&question, &corpus).await?;

        println!("\n=== {mode:?} ===");
        for scored in &result.sections {
            println!(
                "  section {:.3}  {} (pages {}-{})",
                scored.score, scored.section.title, scored.section.start_page, scored.section.end_page
            );
        }
        for scored in &result.chunks {
            println!("  chunk   {:.3}  [{}] {}", scored.score, scored.chunk.section_title, scored.chunk.content);
        }
    }

    Ok(())
}
