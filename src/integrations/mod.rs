//! External integrations module.
//!
//! Provides clients for:
//! - Ollama (local LLM chat and embeddings)

pub mod ollama;

pub use ollama::{ChatMessage, ChatOptions, OllamaClient, OllamaModel};
