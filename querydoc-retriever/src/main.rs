use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use querydoc_context::{Passage, PromptBuilder};
use querydoc_embed::{EmbeddingProvider, FastEmbedProvider, download_model};
use querydoc_retriever::{
    config::{CONFIG_FILE_NAME, QueryDocConfig, RetrievalMode},
    ingest::{ExtractedDocument, IngestPipeline},
    retrieval::{Retrieval, Retriever},
    storage::{DocumentStore, SqliteStore, ingest_hash},
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Ask questions about long documents using hierarchical retrieval.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base directory containing the .querydoc.db database file
    #[arg(short, long, default_value = ".")]
    base_dir: PathBuf,

    /// Configuration file (defaults to querydoc.toml in the base directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize the document database and write a default configuration
    Init,
    /// Ingest a PDF extraction result (JSON with toc and pages_text)
    Ingest {
        /// Extraction JSON file
        input: PathBuf,
        /// Document id (defaults to the extractor's name, then the file stem)
        #[arg(short, long)]
        document: Option<String>,
        /// Re-ingest even if the input has not changed
        #[arg(long)]
        force: bool,
    },
    /// List ingested documents
    List {
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Delete a document with its sections and chunks
    Delete {
        /// Document id
        id: String,
    },
    /// Retrieve the passages relevant to a question
    Ask {
        /// The question
        question: String,
        /// Restrict retrieval to these documents (repeatable)
        #[arg(short, long = "document")]
        documents: Vec<String>,
        /// Rank all chunks directly, without section ranking
        #[arg(long)]
        flat: bool,
        /// Weight of section titles versus section content (0.0 to 1.0)
        #[arg(long)]
        beta: Option<f32>,
        /// Number of sections kept by the coarse stage
        #[arg(long)]
        top_sections: Option<usize>,
        /// Number of chunks returned
        #[arg(long)]
        top_chunks: Option<usize>,
        /// System prompt used with --format prompt
        #[arg(long)]
        system_prompt: Option<String>,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Show database statistics
    Stats {
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Json,
    Prompt,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "json" => Ok(OutputFormat::Json),
            "prompt" => Ok(OutputFormat::Prompt),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[derive(Serialize)]
struct SectionOutput<'a> {
    id: String,
    title: &'a str,
    pages: (u32, u32),
    score: f32,
    title_similarity: f32,
    chunk_similarity: f32,
}

#[derive(Serialize)]
struct ChunkOutput<'a> {
    section: String,
    section_title: &'a str,
    score: f32,
    content: &'a str,
    metadata: &'a serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize)]
struct AskOutput<'a> {
    question: &'a str,
    mode: RetrievalMode,
    sections: Vec<SectionOutput<'a>>,
    chunks: Vec<ChunkOutput<'a>>,
}

impl<'a> AskOutput<'a> {
    fn new(question: &'a str, mode: RetrievalMode, retrieval: &Retrieval<'a>) -> Self {
        Self {
            question,
            mode,
            sections: retrieval
                .sections
                .iter()
                .map(|scored| SectionOutput {
                    id: scored.section.id.to_string(),
                    title: &scored.section.title,
                    pages: (scored.section.start_page, scored.section.end_page),
                    score: scored.score,
                    title_similarity: scored.title_similarity,
                    chunk_similarity: scored.chunk_similarity,
                })
                .collect(),
            chunks: retrieval
                .chunks
                .iter()
                .map(|scored| ChunkOutput {
                    section: scored.chunk.section_id.to_string(),
                    section_title: &scored.chunk.section_title,
                    score: scored.score,
                    content: &scored.chunk.content,
                    metadata: &scored.chunk.metadata,
                })
                .collect(),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = QueryDocConfig::discover(&args.base_dir, args.config.as_deref())?;

    match args.command {
        Commands::Init => {
            let store = SqliteStore::open(&args.base_dir).await?;
            println!("Initialized document database at {}", args.base_dir.display());
            if let Some(path) = store.database_path() {
                println!("Database location: {}", path.display());
            }

            let config_path = args.base_dir.join(CONFIG_FILE_NAME);
            if args.config.is_none() && !config_path.exists() {
                tokio::fs::write(&config_path, config.to_toml()?)
                    .await
                    .with_context(|| format!("Failed to write {}", config_path.display()))?;
                println!("Wrote default configuration to {}", config_path.display());
            }
            Ok(())
        }
        Commands::Ingest {
            input,
            document,
            force,
        } => {
            let bytes = tokio::fs::read(&input)
                .await
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let text = std::str::from_utf8(&bytes)
                .with_context(|| format!("Extraction file {} is not valid UTF-8", input.display()))?;
            let extracted = ExtractedDocument::from_json(text)
                .with_context(|| format!("Invalid extraction file {}", input.display()))?;
            let id = document_id(document, &extracted, &input)?;
            let model = config.embedding.model_id();
            let hash = ingest_hash(&bytes, &model, &config.chunking);

            let store = SqliteStore::open(&args.base_dir).await?;
            if !force && store.document_hash(&id).await?.as_deref() == Some(hash.as_str()) {
                println!("Document '{id}' is unchanged, skipping (use --force to re-ingest)");
                return Ok(());
            }

            let provider = load_provider(&config, &args.base_dir).await?;
            let pipeline = IngestPipeline::new(provider, &config.chunking)?;
            let index = pipeline.ingest(&id, &extracted).await?;
            let record = store.save_document(&index, &hash, &model).await?;

            println!(
                "Ingested '{}': {} sections, {} chunks, dimension {}",
                record.id, record.section_count, record.chunk_count, record.dimension
            );
            Ok(())
        }
        Commands::List { format } => {
            let store = SqliteStore::open(&args.base_dir).await?;
            let documents = store.list_documents().await?;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&documents)?);
                }
                OutputFormat::Summary => {
                    println!("Found {} documents:", documents.len());
                    for record in documents {
                        println!(
                            "  {} | Sections: {} | Chunks: {} | Model: {} | Ingested: {}",
                            record.id,
                            record.section_count,
                            record.chunk_count,
                            record.model,
                            record.ingested_at.format("%Y-%m-%d %H:%M:%S")
                        );
                    }
                }
                OutputFormat::Prompt => bail!("The prompt format is only available for ask"),
            }
            Ok(())
        }
        Commands::Delete { id } => {
            let store = SqliteStore::open(&args.base_dir).await?;
            if !store.delete_document(&id).await? {
                bail!("Document '{id}' not found");
            }
            println!("Deleted document '{id}'");
            Ok(())
        }
        Commands::Ask {
            question,
            documents,
            flat,
            beta,
            top_sections,
            top_chunks,
            system_prompt,
            format,
        } => {
            let mut retrieval_config = config.retrieval.clone();
            if flat {
                retrieval_config = retrieval_config.with_mode(RetrievalMode::Flat);
            }
            if let Some(beta) = beta {
                retrieval_config = retrieval_config.with_beta(beta);
            }
            if let Some(top_sections) = top_sections {
                retrieval_config = retrieval_config.with_top_sections(top_sections);
            }
            if let Some(top_chunks) = top_chunks {
                retrieval_config = retrieval_config.with_top_chunks(top_chunks);
            }
            retrieval_config.validate()?;

            let store = SqliteStore::open(&args.base_dir).await?;
            let selected = (!documents.is_empty()).then_some(documents.as_slice());
            let corpus = store.load_corpus(selected).await?;
            if corpus.is_empty() {
                bail!("No documents ingested yet, run `querydoc ingest` first");
            }
            store.ensure_model(selected, &config.embedding.model_id()).await?;

            let provider = load_provider(&config, &args.base_dir).await?;
            let retriever = Retriever::new(provider, retrieval_config)?;
            let retrieval = retriever.retrieve(&question, &corpus).await?;
            let mode = retriever.config().mode;

            match format {
                OutputFormat::Json => {
                    let output = AskOutput::new(&question, mode, &retrieval);
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Prompt => {
                    let passages: Vec<Passage> = retrieval
                        .chunks
                        .iter()
                        .map(|scored| Passage::new(&scored.chunk.section_title, &scored.chunk.content))
                        .collect();
                    let builder = match system_prompt {
                        Some(prompt) => PromptBuilder::with_system_prompt(prompt),
                        None => PromptBuilder::default(),
                    };
                    print!("{}", builder.build(&question, &passages));
                }
                OutputFormat::Summary => print_retrieval(&retrieval),
            }
            Ok(())
        }
        Commands::Stats { format } => {
            let store = SqliteStore::open(&args.base_dir).await?;
            let stats = store.stats().await?;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&stats)?);
                }
                OutputFormat::Summary => {
                    println!("Document Statistics:");
                    println!("  Documents: {}", stats.documents);
                    println!(
                        "  Sections: {} ({} searchable)",
                        stats.sections, stats.searchable_sections
                    );
                    println!("  Chunks: {}", stats.chunks);
                    match stats.dimension {
                        Some(dimension) => println!("  Embedding dimension: {dimension}"),
                        None => println!("  Embedding dimension: n/a"),
                    }
                    if let Some(path) = &stats.database_path {
                        println!("  Database: {}", path.display());
                    }
                }
                OutputFormat::Prompt => bail!("The prompt format is only available for ask"),
            }
            Ok(())
        }
    }
}

fn document_id(explicit: Option<String>, extracted: &ExtractedDocument, input: &Path) -> anyhow::Result<String> {
    let id = explicit
        .or_else(|| extracted.document.clone())
        .or_else(|| input.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
        .map(|id| id.trim().to_string())
        .unwrap_or_default();
    if id.is_empty() {
        bail!("Cannot derive a document id from {}, pass --document", input.display());
    }
    Ok(id)
}

async fn load_provider(config: &QueryDocConfig, base_dir: &Path) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    let embed_config = config.embedding.to_embed_config(base_dir);
    if embed_config.is_huggingface_model() {
        download_model(&embed_config).await?;
    }
    let provider: Arc<dyn EmbeddingProvider> = Arc::new(
        FastEmbedProvider::create(embed_config)
            .await
            .context("Failed to load the embedding model")?,
    );
    Ok(provider)
}

fn print_retrieval(retrieval: &Retrieval<'_>) {
    if !retrieval.sections.is_empty() {
        println!("Sections:");
        for scored in &retrieval.sections {
            println!(
                "  {:.3} | {} | pages {}-{} | title {:.3} | content {:.3}",
                scored.score,
                scored.section.title,
                scored.section.start_page,
                scored.section.end_page,
                scored.title_similarity,
                scored.chunk_similarity
            );
        }
    }

    if retrieval.chunks.is_empty() {
        println!("No relevant passages found");
        return;
    }
    println!("Passages:");
    for (rank, scored) in retrieval.chunks.iter().enumerate() {
        println!(
            "{}. [{}] ({:.3})\n   {}",
            rank + 1,
            scored.chunk.section_title,
            scored.score,
            scored.chunk.content
        );
    }
}
