//! File-backed vector store.
//!
//! Keeps the whole collection in memory and mirrors it to
//! `<storage_dir>/<collection>.json` after every write, so the index
//! survives restarts without an external service.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::embeddings::{cosine_similarity, EmbeddingProvider};
use super::{StoredMatch, StoredRecord, VectorStore};
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexedRecord {
    record: StoredRecord,
    embedding: Vec<f32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Collection {
    name: String,
    dimension: usize,
    /// Fingerprint of the provider that produced the stored vectors.
    #[serde(default)]
    embedder: String,
    records: Vec<IndexedRecord>,
}

/// Vector store persisted as a JSON file.
pub struct LocalVectorStore {
    path: PathBuf,
    embedder: Arc<dyn EmbeddingProvider>,
    collection: RwLock<Collection>,
}

impl LocalVectorStore {
    /// Open (or create) a collection under `storage_dir`.
    pub async fn open(
        storage_dir: impl AsRef<Path>,
        collection: &str,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let storage_dir = storage_dir.as_ref();
        tokio::fs::create_dir_all(storage_dir).await.map_err(|e| {
            Error::Configuration(format!(
                "Cannot create storage directory {}: {}",
                storage_dir.display(),
                e
            ))
        })?;

        let path = storage_dir.join(format!("{}.json", collection));
        let mut loaded = if path.exists() {
            let content = tokio::fs::read_to_string(&path).await?;
            serde_json::from_str::<Collection>(&content)?
        } else {
            Collection::default()
        };

        let fingerprint = embedder.fingerprint();
        if !loaded.records.is_empty()
            && (loaded.dimension != embedder.dimension() || loaded.embedder != fingerprint)
        {
            info!(
                "Embedding model changed ({} / {} -> {} / {}), discarding stored vectors",
                loaded.embedder,
                loaded.dimension,
                fingerprint,
                embedder.dimension()
            );
            loaded.records.clear();
        }
        loaded.name = collection.to_string();
        loaded.dimension = embedder.dimension();
        loaded.embedder = fingerprint;

        info!(
            "Local vector store opened at {} ({} records)",
            path.display(),
            loaded.records.len()
        );

        Ok(Self {
            path,
            embedder,
            collection: RwLock::new(loaded),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, collection: &Collection) -> Result<()> {
        let json = serde_json::to_string(collection)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Persisted {} records to {}", collection.records.len(), self.path.display());
        Ok(())
    }
}

#[async_trait]
impl VectorStore for LocalVectorStore {
    async fn upsert(&self, records: Vec<StoredRecord>) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;
        if embeddings.len() != records.len() {
            return Err(Error::Embedding(format!(
                "expected {} embeddings, got {}",
                records.len(),
                embeddings.len()
            )));
        }

        let count = records.len();
        let mut collection = self.collection.write().await;
        for (record, embedding) in records.into_iter().zip(embeddings) {
            collection.records.retain(|r| r.record.id != record.id);
            collection.records.push(IndexedRecord { record, embedding });
        }
        self.persist(&collection).await?;

        Ok(count)
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<StoredMatch>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let collection = self.collection.read().await;
        if collection.records.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed_one(text).await?;

        let mut matches: Vec<StoredMatch> = collection
            .records
            .iter()
            .map(|entry| StoredMatch {
                id: entry.record.id.clone(),
                text: entry.record.text.clone(),
                metadata: entry.record.metadata.clone(),
                distance: 1.0 - cosine_similarity(&query_embedding, &entry.embedding),
            })
            .collect();

        matches.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(k);

        Ok(matches)
    }

    async fn clear(&self) -> Result<()> {
        let mut collection = self.collection.write().await;
        collection.records.clear();
        self.persist(&collection).await
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.collection.read().await.records.len())
    }
}
