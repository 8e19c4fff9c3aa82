use clap::Parser;
use querydoc_context::text::{DEFAULT_MAX_CHUNK_LENGTH, PROSE_DELIMITERS, SectionChunker};
use querydoc_context::clean_text;
use std::fs;
use std::io::{self, Read};

/// Chunk a text file the way section text is chunked at ingestion, printing JSON.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input text file. If not provided, reads from stdin.
    #[arg(short, long)]
    input: Option<String>,

    /// Maximum length in bytes of each chunk.
    #[arg(short, long, default_value_t = DEFAULT_MAX_CHUNK_LENGTH)]
    max_chunk_length: usize,

    /// Keep the text as-is instead of collapsing whitespace first.
    #[arg(long)]
    raw: bool,

    /// Comma-separated list of regex patterns for delimiters, most significant first.
    #[arg(short, long, value_delimiter = ',')]
    delimiters: Option<Vec<String>>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let content = match args.input {
        Some(input_path) => fs::read_to_string(input_path)?,
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };
    let content = if args.raw { content } else { clean_text(&content) };

    let patterns: Vec<&str> = match &args.delimiters {
        Some(d) => d.iter().map(String::as_str).collect(),
        None => PROSE_DELIMITERS.to_vec(),
    };

    let chunker = SectionChunker::new(&patterns, args.max_chunk_length)?;
    let chunks = chunker.chunk(&content);

    println!("{}", serde_json::to_string_pretty(&chunks)?);
    Ok(())
}
