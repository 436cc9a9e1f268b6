//! Similarity-gated retrieval over a [`VectorStore`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{StoredMatch, VectorStore};
use crate::Error;

/// One piece of retrieved knowledge.
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceChunk {
    pub content: String,
    pub metadata: HashMap<String, String>,
    /// Similarity in [0, 1], higher is closer.
    pub similarity: f32,
}

impl EvidenceChunk {
    pub fn title(&self) -> Option<&str> {
        self.metadata.get("title").map(String::as_str)
    }
}

impl From<StoredMatch> for EvidenceChunk {
    fn from(m: StoredMatch) -> Self {
        Self {
            content: m.text,
            metadata: m.metadata,
            similarity: distance_to_similarity(m.distance),
        }
    }
}

/// Chunks ordered by descending similarity, all above the threshold.
pub type RetrievalResult = Vec<EvidenceChunk>;

/// Finds evidence for a user message.
///
/// Retrieval never fails from the caller's point of view: an unavailable
/// store yields an empty result.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, max_results: usize, min_similarity: f32)
        -> RetrievalResult;
}

/// Cosine distance to similarity, clamped to [0, 1].
pub fn distance_to_similarity(distance: f32) -> f32 {
    if distance.is_nan() {
        return 0.0;
    }
    (1.0 - distance).clamp(0.0, 1.0)
}

/// [`Retriever`] backed by a vector store.
pub struct VectorRetriever {
    store: Arc<dyn VectorStore>,
    timeout: Option<Duration>,
}

impl VectorRetriever {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self {
            store,
            timeout: None,
        }
    }

    /// Bound each store query; a timed-out query counts as no evidence.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn query_store(&self, query: &str, k: usize) -> crate::Result<Vec<StoredMatch>> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.store.query(query, k))
                .await
                .map_err(|_| Error::Timeout(format!("vector store query after {:?}", limit)))?,
            None => self.store.query(query, k).await,
        }
    }
}

#[async_trait]
impl Retriever for VectorRetriever {
    async fn retrieve(
        &self,
        query: &str,
        max_results: usize,
        min_similarity: f32,
    ) -> RetrievalResult {
        if max_results == 0 {
            return Vec::new();
        }

        let matches = match self.query_store(query, max_results).await {
            Ok(matches) => matches,
            Err(err) => {
                let err = match err {
                    Error::Timeout(_) => err,
                    other => Error::RetrievalUnavailable(other.to_string()),
                };
                warn!("Retrieval failed, continuing without evidence: {}", err);
                return Vec::new();
            }
        };

        let mut chunks: Vec<EvidenceChunk> = matches
            .into_iter()
            .map(EvidenceChunk::from)
            .filter(|chunk| chunk.similarity >= min_similarity)
            .collect();

        chunks.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        chunks.truncate(max_results);

        debug!(
            "Retrieved {} chunks above similarity {:.2}",
            chunks.len(),
            min_similarity
        );

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::{StoredRecord, VectorStore};
    use crate::Result;

    /// Store returning fixed matches regardless of the query.
    struct FixedStore {
        matches: Vec<StoredMatch>,
    }

    #[async_trait]
    impl VectorStore for FixedStore {
        async fn upsert(&self, records: Vec<StoredRecord>) -> Result<usize> {
            Ok(records.len())
        }

        async fn query(&self, _text: &str, k: usize) -> Result<Vec<StoredMatch>> {
            Ok(self.matches.iter().take(k).cloned().collect())
        }

        async fn clear(&self) -> Result<()> {
            Ok(())
        }

        async fn count(&self) -> Result<usize> {
            Ok(self.matches.len())
        }
    }

    struct FailingStore;

    #[async_trait]
    impl VectorStore for FailingStore {
        async fn upsert(&self, _records: Vec<StoredRecord>) -> Result<usize> {
            Err(Error::VectorStore("down".into()))
        }

        async fn query(&self, _text: &str, _k: usize) -> Result<Vec<StoredMatch>> {
            Err(Error::VectorStore("connection refused".into()))
        }

        async fn clear(&self) -> Result<()> {
            Err(Error::VectorStore("down".into()))
        }

        async fn count(&self) -> Result<usize> {
            Err(Error::VectorStore("down".into()))
        }
    }

    struct SlowStore;

    #[async_trait]
    impl VectorStore for SlowStore {
        async fn upsert(&self, records: Vec<StoredRecord>) -> Result<usize> {
            Ok(records.len())
        }

        async fn query(&self, _text: &str, _k: usize) -> Result<Vec<StoredMatch>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![hit("late", 0.0)])
        }

        async fn clear(&self) -> Result<()> {
            Ok(())
        }

        async fn count(&self) -> Result<usize> {
            Ok(0)
        }
    }

    fn hit(text: &str, distance: f32) -> StoredMatch {
        StoredMatch {
            id: text.to_string(),
            text: text.to_string(),
            metadata: HashMap::from([("title".to_string(), text.to_uppercase())]),
            distance,
        }
    }

    fn retriever(matches: Vec<StoredMatch>) -> VectorRetriever {
        VectorRetriever::new(Arc::new(FixedStore { matches }))
    }

    #[test]
    fn distance_conversion_is_clamped() {
        assert_eq!(distance_to_similarity(0.0), 1.0);
        assert!((distance_to_similarity(0.25) - 0.75).abs() < 1e-6);
        assert_eq!(distance_to_similarity(1.5), 0.0);
        assert_eq!(distance_to_similarity(-0.1), 1.0);
        assert_eq!(distance_to_similarity(f32::NAN), 0.0);
    }

    #[tokio::test]
    async fn filters_chunks_below_threshold() {
        let rag = retriever(vec![hit("close", 0.1), hit("medium", 0.5), hit("far", 0.9)]);

        let chunks = rag.retrieve("query", 3, 0.4).await;
        let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();

        assert_eq!(contents, vec!["close", "medium"]);
        assert!((chunks[0].similarity - 0.9).abs() < 1e-6);
        assert_eq!(chunks[0].title(), Some("CLOSE"));
    }

    #[tokio::test]
    async fn threshold_is_inclusive() {
        let rag = retriever(vec![hit("edge", 0.5)]);
        assert_eq!(rag.retrieve("query", 3, 0.5).await.len(), 1);
    }

    #[tokio::test]
    async fn respects_max_results() {
        let rag = retriever(vec![hit("a", 0.1), hit("b", 0.2), hit("c", 0.3)]);
        assert_eq!(rag.retrieve("query", 2, 0.0).await.len(), 2);
        assert!(rag.retrieve("query", 0, 0.0).await.is_empty());
    }

    #[tokio::test]
    async fn raising_threshold_never_adds_chunks() {
        let rag = retriever(vec![
            hit("a", 0.05),
            hit("b", 0.3),
            hit("c", 0.55),
            hit("d", 0.8),
        ]);

        let mut previous = usize::MAX;
        for step in 0..=10 {
            let threshold = step as f32 / 10.0;
            let count = rag.retrieve("query", 4, threshold).await.len();
            assert!(count <= previous, "threshold {threshold} returned more chunks");
            previous = count;
        }
    }

    #[tokio::test]
    async fn empty_store_yields_empty_result() {
        let rag = retriever(Vec::new());
        assert!(rag.retrieve("What are flu symptoms?", 3, 0.4).await.is_empty());
    }

    #[tokio::test]
    async fn store_failure_yields_empty_result() {
        let rag = VectorRetriever::new(Arc::new(FailingStore));
        assert!(rag.retrieve("query", 3, 0.0).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn store_timeout_yields_empty_result() {
        let rag = VectorRetriever::new(Arc::new(SlowStore)).with_timeout(Duration::from_secs(1));
        assert!(rag.retrieve("query", 3, 0.0).await.is_empty());
    }
}
