//! Prompt construction for answer generation.
//!
//! Retrieved chunks become a context block of `[<section title>] <content>`
//! passages separated by blank lines. The prompt wraps the system prompt, the
//! context and the question in `=== ... ===` markers and ends with an answer
//! marker for the model to continue from.

use serde::{Deserialize, Serialize};

pub const SYSTEM_PROMPT_MARKER: &str = "=== System Prompt ===";
pub const CONTEXT_MARKER: &str = "=== Document Context ===";
pub const QUESTION_MARKER: &str = "=== User Question ===";
pub const ANSWER_MARKER: &str = "=== Answer ===";

pub const DEFAULT_SYSTEM_PROMPT: &str = "Answer the user's question based on the information provided in the document context below.\nYour response should reference the context clearly, but you may paraphrase or summarize appropriately.";

/// A retrieved passage as it appears in the context block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    pub section_title: String,
    pub content: String,
}

impl Passage {
    pub fn new(section_title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            section_title: section_title.into(),
            content: content.into(),
        }
    }

    pub fn render(&self) -> String {
        format!("[{}] {}", self.section_title, self.content)
    }
}

/// Render passages, in retrieval order, as the document context block.
pub fn build_context(passages: &[Passage]) -> String {
    passages
        .iter()
        .map(Passage::render)
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptBuilder {
    system_prompt: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl PromptBuilder {
    /// Use a custom system prompt. A blank prompt falls back to the default.
    pub fn with_system_prompt(system_prompt: impl Into<String>) -> Self {
        let system_prompt = system_prompt.into();
        if system_prompt.trim().is_empty() {
            return Self::default();
        }
        Self { system_prompt }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn build(&self, question: &str, passages: &[Passage]) -> String {
        format!(
            "{SYSTEM_PROMPT_MARKER}\n{}\n\n{CONTEXT_MARKER}\n{}\n\n{QUESTION_MARKER}\n{}\n\n{ANSWER_MARKER}\n",
            self.system_prompt.trim(),
            build_context(passages),
            question.trim()
        )
    }
}
