//! Knowledge-base file parsing and ingestion.
//!
//! The knowledge base is a plain text file of records separated by a line
//! containing `---`. The first line of a record is its title, the rest is
//! its content.

use std::collections::HashMap;
use std::path::Path;

use tracing::{info, warn};
use uuid::Uuid;

use super::{StoredRecord, VectorStore};
use crate::{Error, Result};

const RECORD_DELIMITER: &str = "---";

/// One titled entry of the knowledge base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeRecord {
    pub title: String,
    pub content: String,
}

impl KnowledgeRecord {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }

    fn into_stored(self) -> StoredRecord {
        StoredRecord {
            id: Uuid::new_v4().to_string(),
            text: self.content,
            metadata: HashMap::from([("title".to_string(), self.title)]),
        }
    }
}

/// Split raw knowledge-base text into records.
///
/// Blank records and records without content are skipped.
pub fn parse_knowledge_base(raw: &str) -> Vec<KnowledgeRecord> {
    raw.trim()
        .split(RECORD_DELIMITER)
        .filter_map(|block| {
            let block = block.trim();
            if block.is_empty() {
                return None;
            }

            let (title, rest) = block.split_once('\n').unwrap_or((block, ""));
            let content = rest.trim();
            if content.is_empty() {
                return None;
            }

            Some(KnowledgeRecord {
                title: title.trim().to_string(),
                content: content.to_string(),
            })
        })
        .collect()
}

/// Read and parse a knowledge-base file.
pub fn load_knowledge_file(path: impl AsRef<Path>) -> Result<Vec<KnowledgeRecord>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| {
        Error::Configuration(format!(
            "Knowledge base file not found at {}: {}",
            path.display(),
            e
        ))
    })?;

    Ok(parse_knowledge_base(&raw))
}

/// Loads knowledge-base records into a vector store.
pub struct KnowledgeBase;

impl KnowledgeBase {
    /// Replace the store contents with `records`. Returns the number stored.
    pub async fn rebuild(store: &dyn VectorStore, records: Vec<KnowledgeRecord>) -> Result<usize> {
        store.clear().await?;
        info!("Existing knowledge base cleared from the vector store");

        if records.is_empty() {
            warn!("No valid documents found in the knowledge base");
            return Ok(0);
        }

        info!("Adding {} documents to the vector store", records.len());
        let stored = store
            .upsert(records.into_iter().map(KnowledgeRecord::into_stored).collect())
            .await?;
        info!("Knowledge base loaded: {} documents", stored);

        Ok(stored)
    }

    /// Read `path` and rebuild the store from it.
    pub async fn rebuild_from_file(store: &dyn VectorStore, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        info!("Loading knowledge base from {}", path.display());
        let records = load_knowledge_file(path)?;
        Self::rebuild(store, records).await
    }
}
