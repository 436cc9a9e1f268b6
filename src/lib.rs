//! NileCare health chat assistant library
//!
//! This library provides tools to:
//! - Parse a plain-text health knowledge base and index it in a vector store
//! - Retrieve evidence for a user question, gated by a similarity threshold
//! - Compose grounded or ungrounded prompts around the user's message
//! - Hold a multi-turn conversation with a locally served language model
//! - Expose per-turn Prometheus metrics

pub mod app;
pub mod config;
pub mod conversation;
pub mod dialogue;
pub mod error;
pub mod integrations;
pub mod llm;
pub mod metrics;
pub mod prompts;
pub mod rag;

// Re-export common types
pub use config::Config;
pub use conversation::{ConversationState, Role, Turn};
pub use dialogue::{DialogueCore, DialogueSettings, FALLBACK_REPLY};
pub use error::{Error, Result};
pub use integrations::{OllamaClient, OllamaModel};
pub use llm::LanguageModel;
pub use prompts::{ComposedPrompt, Evidence, PromptComposer, PromptMode, PromptTemplates};
pub use rag::{EvidenceChunk, RetrievalResult, Retriever, VectorRetriever, VectorStore};
