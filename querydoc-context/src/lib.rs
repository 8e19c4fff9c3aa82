//! Text handling around retrieval: cleaning extracted page text, chunking
//! section text, and turning retrieved chunks into an answer-generation prompt.

pub mod clean;
pub mod prompt;
pub mod text;

pub use clean::{clean_text, join_pages};
pub use prompt::{DEFAULT_SYSTEM_PROMPT, Passage, PromptBuilder, build_context};
pub use text::{DEFAULT_MAX_CHUNK_LENGTH, PROSE_DELIMITERS, SectionChunker, TextChunk};
