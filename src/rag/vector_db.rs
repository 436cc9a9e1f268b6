//! Vector database integration with Qdrant

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use qdrant_client::qdrant::{
    CreateCollectionBuilder, Distance, PointStruct, SearchPointsBuilder, UpsertPointsBuilder,
    Value as QdrantValue, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use tracing::{debug, info};
use uuid::Uuid;

use super::embeddings::EmbeddingProvider;
use super::{StoredMatch, StoredRecord, VectorStore};
use crate::{Error, Result};

/// Vector store backed by a Qdrant collection with cosine distance.
pub struct QdrantStore {
    client: Qdrant,
    collection: String,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl QdrantStore {
    /// Connect to Qdrant and make sure the collection exists.
    pub async fn connect(
        url: &str,
        collection: &str,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| Error::Configuration(format!("Invalid Qdrant URL {}: {}", url, e)))?;

        let store = Self {
            client,
            collection: collection.to_string(),
            embedder,
        };
        store.init_collection().await?;

        Ok(store)
    }

    /// Create the collection if it doesn't exist.
    pub async fn init_collection(&self) -> Result<()> {
        if self.client.collection_exists(&self.collection).await? {
            debug!("Collection '{}' already exists", self.collection);
            return Ok(());
        }

        info!("Creating collection '{}'", self.collection);
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection).vectors_config(
                    VectorParamsBuilder::new(self.embedder.dimension() as u64, Distance::Cosine),
                ),
            )
            .await?;

        Ok(())
    }
}

/// Qdrant only accepts UUID or integer ids, so other ids are mapped to a
/// stable UUID derived from the string.
fn point_id(id: &str) -> String {
    match Uuid::parse_str(id) {
        Ok(uuid) => uuid.to_string(),
        Err(_) => Uuid::new_v5(&Uuid::NAMESPACE_OID, id.as_bytes()).to_string(),
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn upsert(&self, records: Vec<StoredRecord>) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;

        let points: Vec<PointStruct> = records
            .into_iter()
            .zip(embeddings)
            .filter(|(_, embedding)| !embedding.is_empty())
            .map(|(record, embedding)| {
                let mut payload: HashMap<String, QdrantValue> = HashMap::new();
                payload.insert("record_id".into(), record.id.clone().into());
                payload.insert("text".into(), record.text.into());
                payload.insert(
                    "metadata".into(),
                    serde_json::to_string(&record.metadata)
                        .unwrap_or_default()
                        .into(),
                );

                PointStruct::new(point_id(&record.id), embedding, payload)
            })
            .collect();

        if points.is_empty() {
            return Ok(0);
        }

        let count = points.len();
        debug!("Upserting {} points to Qdrant", count);

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await?;

        Ok(count)
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<StoredMatch>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed_one(text).await?;
        let results = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection, query_embedding, k as u64)
                    .with_payload(true),
            )
            .await?;

        // Qdrant reports cosine similarity as the score.
        let matches = results
            .result
            .into_iter()
            .filter_map(|point| {
                let payload = point.payload;
                let text = payload.get("text")?.as_text()?.to_string();
                let id = payload
                    .get("record_id")
                    .and_then(|v| v.as_text())
                    .unwrap_or_default()
                    .to_string();
                let metadata: HashMap<String, String> = payload
                    .get("metadata")
                    .and_then(|v| v.as_text())
                    .and_then(|raw| serde_json::from_str(raw).ok())
                    .unwrap_or_default();

                Some(StoredMatch {
                    id,
                    text,
                    metadata,
                    distance: 1.0 - point.score,
                })
            })
            .collect();

        Ok(matches)
    }

    async fn clear(&self) -> Result<()> {
        if self.client.collection_exists(&self.collection).await? {
            self.client.delete_collection(&self.collection).await?;
            info!("Deleted collection '{}'", self.collection);
        }
        self.init_collection().await
    }

    async fn count(&self) -> Result<usize> {
        let info = self.client.collection_info(&self.collection).await?;

        Ok(info
            .result
            .and_then(|r| r.points_count)
            .unwrap_or(0) as usize)
    }
}

trait QdrantValueExt {
    fn as_text(&self) -> Option<&str>;
}

impl QdrantValueExt for QdrantValue {
    fn as_text(&self) -> Option<&str> {
        match &self.kind {
            Some(qdrant_client::qdrant::value::Kind::StringValue(v)) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::embeddings::LocalEmbedder;

    #[test]
    fn point_id_keeps_uuids() {
        let id = Uuid::new_v4().to_string();
        assert_eq!(point_id(&id), id);
    }

    #[test]
    fn point_id_maps_other_ids_stably() {
        let a = point_id("balanced-diet");
        let b = point_id("balanced-diet");
        assert_eq!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
        assert_ne!(a, point_id("sleep"));
    }

    #[test]
    fn string_values_round_trip_through_ext() {
        let value: QdrantValue = "hello".to_string().into();
        assert_eq!(QdrantValueExt::as_text(&value), Some("hello"));

        let number: QdrantValue = 5i64.into();
        assert_eq!(QdrantValueExt::as_text(&number), None);
    }

    #[tokio::test]
    #[ignore] // Requires a running Qdrant at QDRANT_URL
    async fn test_qdrant_round_trip() {
        dotenvy::dotenv().ok();
        let url = std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://localhost:6334".into());
        let store = QdrantStore::connect(&url, "nilecare_test", Arc::new(LocalEmbedder::new(64)))
            .await
            .unwrap();

        store.clear().await.unwrap();
        store
            .upsert(vec![StoredRecord {
                id: "diet".into(),
                text: "Eat vegetables.".into(),
                metadata: HashMap::from([("title".into(), "Balanced Diet".into())]),
            }])
            .await
            .unwrap();

        let hits = store.query("vegetables", 1).await.unwrap();
        assert_eq!(hits[0].metadata["title"], "Balanced Diet");
    }
}
