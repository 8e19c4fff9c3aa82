//! Embeds a handful of section titles and a question, then prints how close
//! each title is to the question.
//!
//! Run with: cargo run -p querydoc-embed --example embed_titles

use querydoc_embed::{EmbedConfig, EmbeddingProvider, FastEmbedProvider};

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    dot / (norm_a * norm_b + 1e-8)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let temp_dir = tempfile::tempdir()?;
    let mut config = EmbedConfig::default().with_batch_size(8);
    config.model_base_path = temp_dir.path().to_path_buf();

    println!("Model: {} (batch size {})", config.model_name, config.batch_size);

    let provider = FastEmbedProvider::create(config).await?;
    println!(
        "Provider {} ready, dimension {}",
        provider.provider_name(),
        provider.embedding_dimension()
    );

    let titles = vec![
        "1. Introduction".to_string(),
        "2. Installing the software".to_string(),
        "3. Network configuration".to_string(),
        "4. Frequently asked questions".to_string(),
    ];
    let question = "How do I set up the program on my computer?";

    let title_embeddings = provider.embed_texts(&titles).await?;
    let query = provider.embed_text(question).await?;

    println!("\nQuestion: {question}");
    for (title, embedding) in titles.iter().zip(&title_embeddings.embeddings) {
        println!("  {:>6.3}  {}", cosine(&query, embedding), title);
    }

    Ok(())
}
