//! Splitting section text into retrieval chunks.
//!
//! [`SectionChunker`] cuts text at the most significant delimiter that keeps
//! pieces under the length limit: paragraphs first, then lines, sentences,
//! clauses and finally single spaces. Pieces are then packed greedily back
//! together so that each chunk is as long as possible without exceeding
//! `max_chunk_length` bytes.
//!
//! ```
//! use querydoc_context::text::SectionChunker;
//!
//! let chunker = SectionChunker::with_defaults(60).unwrap();
//! let text = "The printer ships with a driver CD. Insert it and run setup. \
//!             If setup does not start, open the CD and run install.exe manually.";
//!
//! let chunks = chunker.chunk(text);
//! assert!(chunks.len() > 1);
//! assert!(chunks.iter().all(|c| c.text.len() <= 60));
//! assert_eq!(chunks[0].sequence, 0);
//! ```

use regex::Regex;
use serde::Serialize;
use std::ops::Range;

/// Delimiters for extracted document prose, most significant first.
pub const PROSE_DELIMITERS: &[&str] = &[
    r"\n\s*\n",         // Paragraphs
    r"\n",              // Line breaks
    r"[.!?。！？]\s+", // Sentence ends
    r"[,;:，、；]\s*",  // Clauses
    r"\s+",             // Words
];

/// Maximum chunk length used when nothing else is configured.
pub const DEFAULT_MAX_CHUNK_LENGTH: usize = 800;

/// One chunk of a section's text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextChunk {
    /// Position among the chunks of the same text, starting at 0
    pub sequence: usize,
    /// Chunk text with surrounding whitespace trimmed
    pub text: String,
    /// Byte offset of `text` in the input
    pub start: usize,
    /// Byte offset one past the end of `text` in the input
    pub end: usize,
}

/// Recursive delimiter-based chunker.
#[derive(Debug, Clone)]
pub struct SectionChunker {
    delimiters: Vec<Regex>,
    max_chunk_length: usize,
}

impl SectionChunker {
    /// Build a chunker from delimiter regexes ordered from most to least significant.
    /// A `max_chunk_length` of 0 is treated as 1.
    pub fn new(delimiter_patterns: &[&str], max_chunk_length: usize) -> Result<Self, regex::Error> {
        let delimiters = delimiter_patterns
            .iter()
            .map(|pattern| Regex::new(pattern))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            delimiters,
            max_chunk_length: max_chunk_length.max(1),
        })
    }

    /// Chunker using [`PROSE_DELIMITERS`].
    pub fn with_defaults(max_chunk_length: usize) -> Result<Self, regex::Error> {
        Self::new(PROSE_DELIMITERS, max_chunk_length)
    }

    pub fn max_chunk_length(&self) -> usize {
        self.max_chunk_length
    }

    /// Split `text` into chunks. Whitespace-only chunks are dropped, so an empty
    /// or blank input yields no chunks.
    pub fn chunk(&self, text: &str) -> Vec<TextChunk> {
        let segments = self.split_into_segments(text, 0, 0);

        let mut chunks = Vec::new();
        let mut current: Option<Range<usize>> = None;

        for segment in segments {
            current = match current {
                Some(range) if segment.end - range.start > self.max_chunk_length => {
                    self.push_chunk(text, range, &mut chunks);
                    Some(segment)
                }
                Some(range) => Some(range.start..segment.end),
                None => Some(segment),
            };
        }
        if let Some(range) = current {
            self.push_chunk(text, range, &mut chunks);
        }

        chunks
    }

    fn push_chunk(&self, text: &str, range: Range<usize>, chunks: &mut Vec<TextChunk>) {
        let raw = &text[range.clone()];
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return;
        }
        let start = range.start + (raw.len() - raw.trim_start().len());
        chunks.push(TextChunk {
            sequence: chunks.len(),
            text: trimmed.to_string(),
            start,
            end: start + trimmed.len(),
        });
    }

    // Returns contiguous byte ranges covering `text`, each no longer than the limit
    // unless it is a single character wider than the limit.
    fn split_into_segments(
        &self,
        text: &str,
        delimiter_idx: usize,
        offset: usize,
    ) -> Vec<Range<usize>> {
        if text.is_empty() {
            return Vec::new();
        }
        if text.len() <= self.max_chunk_length {
            return vec![offset..offset + text.len()];
        }

        let Some(delimiter) = self.delimiters.get(delimiter_idx) else {
            return split_at_char_boundaries(text, self.max_chunk_length, offset);
        };

        let mut segments = Vec::new();
        let mut local_start = 0;

        for mat in delimiter.find_iter(text) {
            if mat.start() > local_start {
                segments.extend(self.split_into_segments(
                    &text[local_start..mat.start()],
                    delimiter_idx + 1,
                    offset + local_start,
                ));
            }
            // Long delimiter runs (e.g. huge whitespace) still respect the limit
            segments.extend(self.split_into_segments(
                mat.as_str(),
                self.delimiters.len(),
                offset + mat.start(),
            ));
            local_start = mat.end();
        }

        if local_start < text.len() {
            segments.extend(self.split_into_segments(
                &text[local_start..],
                delimiter_idx + 1,
                offset + local_start,
            ));
        }

        segments
    }
}

fn split_at_char_boundaries(text: &str, max_len: usize, offset: usize) -> Vec<Range<usize>> {
    let mut segments = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            // A single character longer than the limit
            end = start + 1;
            while !text.is_char_boundary(end) {
                end += 1;
            }
        }
        segments.push(offset + start..offset + end);
        start = end;
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(max: usize) -> SectionChunker {
        SectionChunker::with_defaults(max).unwrap()
    }

    #[test]
    fn test_short_text_is_one_chunk() {
        let chunks = chunker(500).chunk("Press the power button for three seconds.");

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Press the power button for three seconds.");
        assert_eq!(chunks[0].sequence, 0);
        assert_eq!(chunks[0].start, 0);
    }

    #[test]
    fn test_empty_and_blank_text() {
        assert!(chunker(500).chunk("").is_empty());
        assert!(chunker(500).chunk("   \n\t  ").is_empty());
    }

    #[test]
    fn test_long_text_respects_limit() {
        let text = (0..100)
            .map(|i| format!("Sentence number {i} explains a step. "))
            .collect::<String>();
        let max = 200;

        let chunks = chunker(max).chunk(&text);

        assert!(chunks.len() >= text.len() / max);
        assert!(chunks.len() <= text.len() / max * 2 + 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.sequence, i);
            assert!(chunk.text.len() <= max);
            assert_eq!(&text[chunk.start..chunk.end], chunk.text);
        }
    }

    #[test]
    fn test_splits_on_sentences_before_words() {
        let text = "First sentence is here. Second sentence is here. Third one.";
        let chunks = chunker(30).chunk(text);

        assert_eq!(chunks[0].text, "First sentence is here.");
        assert_eq!(chunks[1].text, "Second sentence is here.");
        assert_eq!(chunks[2].text, "Third one.");
    }

    #[test]
    fn test_paragraphs_preferred() {
        let text = "Alpha paragraph text.\n\nBeta paragraph text.";
        let chunks = chunker(25).chunk(text);

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["Alpha paragraph text.", "Beta paragraph text."]);
    }

    #[test]
    fn test_multibyte_text_without_delimiters() {
        // No delimiter matches, so the fallback splits by bytes on char boundaries
        let text = "설명서".repeat(50);
        let chunks = chunker(10).chunk(&text);

        assert!(chunks.len() > 1);
        let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rebuilt, text);
        assert!(chunks.iter().all(|c| c.text.len() <= 10));
    }

    #[test]
    fn test_limit_smaller_than_a_character() {
        let chunks = chunker(1).chunk("é");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "é");
    }

    #[test]
    fn test_invalid_delimiter_pattern() {
        assert!(SectionChunker::new(&["("], 100).is_err());
    }

    #[test]
    fn test_serialized_chunk() {
        let chunks = chunker(100).chunk("  Warranty covers two years.");
        let json = serde_json::to_value(&chunks[0]).unwrap();

        assert_eq!(json["text"], "Warranty covers two years.");
        assert_eq!(json["start"], 2);
        assert_eq!(json["sequence"], 0);
    }
}
