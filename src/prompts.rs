//! Prompt construction for grounded and ungrounded answers.
//!
//! The composer wraps every user message in an instruction before it reaches
//! the model. With evidence it restricts the model to that evidence; without
//! it the model may use general knowledge but must add a health disclaimer.
//!
//! Instruction preambles can be overridden by `grounded.md` and
//! `ungrounded.md` in a prompts directory.

use std::fmt::Write as _;
use std::path::Path;

use crate::rag::{EvidenceChunk, RetrievalResult};
use crate::{Error, Result};

pub const GROUNDED_FILE: &str = "grounded.md";
pub const UNGROUNDED_FILE: &str = "ungrounded.md";

const DEFAULT_GROUNDED: &str = "You are a helpful and informative healthcare chatbot. \
Using *only* the following information from the knowledge base, answer the user's question \
concisely and accurately. If the question cannot be answered from the provided information, \
or if it requires personalized medical advice or diagnosis, state clearly that you don't have \
enough information to answer that question and strongly suggest consulting a qualified \
healthcare professional.";

const DEFAULT_UNGROUNDED: &str = "You are a helpful and informative chatbot. Please answer \
the user's question to the best of your ability. If the question is about a specific health \
condition or requires a diagnosis, you must add a disclaimer stating that the information is \
from your general knowledge and that the user should consult a qualified healthcare \
professional for an accurate diagnosis.";

/// Evidence available for one turn.
#[derive(Debug, Clone, PartialEq)]
pub enum Evidence {
    /// At least one chunk passed the similarity threshold.
    Grounded(Vec<EvidenceChunk>),
    /// Nothing relevant was found.
    Ungrounded,
}

impl From<RetrievalResult> for Evidence {
    fn from(chunks: RetrievalResult) -> Self {
        if chunks.is_empty() {
            Evidence::Ungrounded
        } else {
            Evidence::Grounded(chunks)
        }
    }
}

impl Evidence {
    pub fn mode(&self) -> PromptMode {
        match self {
            Evidence::Grounded(_) => PromptMode::Grounded,
            Evidence::Ungrounded => PromptMode::Ungrounded,
        }
    }
}

/// Which instruction template was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptMode {
    Grounded,
    Ungrounded,
}

impl PromptMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptMode::Grounded => "grounded",
            PromptMode::Ungrounded => "ungrounded",
        }
    }
}

/// Final text sent to the model as the newest user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedPrompt {
    pub text: String,
    pub mode: PromptMode,
}

/// Instruction preambles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplates {
    pub grounded: String,
    pub ungrounded: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            grounded: DEFAULT_GROUNDED.to_string(),
            ungrounded: DEFAULT_UNGROUNDED.to_string(),
        }
    }
}

impl PromptTemplates {
    /// Load overrides from `dir`; missing files keep the built-in text.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut templates = Self::default();

        if let Some(text) = read_override(&dir.join(GROUNDED_FILE))? {
            templates.grounded = text;
        }
        if let Some(text) = read_override(&dir.join(UNGROUNDED_FILE))? {
            templates.ungrounded = text;
        }

        Ok(templates)
    }
}

fn read_override(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }

    let text = std::fs::read_to_string(path).map_err(|e| {
        Error::Configuration(format!("Failed to load prompt {}: {}", path.display(), e))
    })?;
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    Ok(Some(text.to_string()))
}

/// Builds the model-facing prompt. Pure: same inputs, same text.
#[derive(Debug, Clone, Default)]
pub struct PromptComposer {
    templates: PromptTemplates,
}

impl PromptComposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_templates(templates: PromptTemplates) -> Self {
        Self { templates }
    }

    pub fn templates(&self) -> &PromptTemplates {
        &self.templates
    }

    pub fn compose(&self, user_message: &str, evidence: &Evidence) -> ComposedPrompt {
        let mut text = String::new();

        match evidence {
            Evidence::Grounded(chunks) => {
                text.push_str(&self.templates.grounded);
                text.push_str("\n\nRelevant Information from Knowledge Base:\n");
                for (idx, chunk) in chunks.iter().enumerate() {
                    let _ = writeln!(text, "--- Document {} ---", idx + 1);
                    text.push_str(&chunk.content);
                    text.push('\n');
                }
                text.push('\n');
            }
            Evidence::Ungrounded => {
                text.push_str(&self.templates.ungrounded);
                text.push_str("\n\n");
            }
        }

        text.push_str("User's Question: ");
        text.push_str(user_message);

        ComposedPrompt {
            text,
            mode: evidence.mode(),
        }
    }
}
