//! Retrieval layer for the knowledge base.
//!
//! Provides:
//! - Embedding providers (fastembed all-MiniLM-L6-v2, Ollama, OpenAI, local hashing)
//! - Vector stores (file-backed local store, Qdrant)
//! - Knowledge-base parsing and ingestion
//! - The similarity-gated retriever consumed by the dialogue core
//!
//! Stores speak cosine *distance* (lower is closer). The retriever is the only
//! place that converts distance to similarity.

pub mod embeddings;
pub mod knowledge;
pub mod local_store;
pub mod retriever;
pub mod vector_db;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

pub use embeddings::{EmbeddingProvider, FastEmbedder, LocalEmbedder, OllamaEmbedder, OpenAiEmbedder};
pub use knowledge::{load_knowledge_file, parse_knowledge_base, KnowledgeBase, KnowledgeRecord};
pub use local_store::LocalVectorStore;
pub use retriever::{EvidenceChunk, RetrievalResult, Retriever, VectorRetriever};
pub use vector_db::QdrantStore;

/// A record to be stored: text plus string metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    pub text: String,
    pub metadata: HashMap<String, String>,
}

/// A nearest-neighbor hit.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMatch {
    pub id: String,
    pub text: String,
    pub metadata: HashMap<String, String>,
    /// Cosine distance, lower is closer.
    pub distance: f32,
}

/// Persistent store of embedded text records.
///
/// Implementations embed both records and queries with their own
/// [`EmbeddingProvider`].
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Embed and store records, replacing any with the same id.
    async fn upsert(&self, records: Vec<StoredRecord>) -> Result<usize>;

    /// Up to `k` nearest records, ascending distance.
    async fn query(&self, text: &str, k: usize) -> Result<Vec<StoredMatch>>;

    /// Remove every record.
    async fn clear(&self) -> Result<()>;

    async fn count(&self) -> Result<usize>;
}
