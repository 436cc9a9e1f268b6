//! Embedding providers: fastembed (all-MiniLM-L6-v2), OpenAI, Ollama and a
//! deterministic local fallback

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_openai::{
    config::OpenAIConfig,
    types::{CreateEmbeddingRequestArgs, EmbeddingInput},
    Client as OpenAIClient,
};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, TextEmbedding, TextInitOptions};
use tracing::{debug, info};

use crate::integrations::OllamaClient;
use crate::{Error, Result};

/// Turns text into fixed-length vectors, one per input, order-preserving.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn dimension(&self) -> usize;

    /// Identifies the model and algorithm; vectors from providers with
    /// different fingerprints are not comparable.
    fn fingerprint(&self) -> String;

    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("No embedding returned".to_string()))
    }
}

/// Deterministic, fast bag-of-words embedding for offline use and tests.
///
/// Only exact tokens match, so it has no notion of synonyms.
#[derive(Debug, Clone)]
pub struct LocalEmbedder {
    dim: usize,
}

impl LocalEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(8) }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dim];
        for token in text.split_whitespace() {
            let token: String = token
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if token.is_empty() {
                continue;
            }
            let idx = (fnv1a(token.as_bytes()) % self.dim as u64) as usize;
            vec[idx] += 1.0;
        }

        normalize(&mut vec);
        vec
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn fingerprint(&self) -> String {
        format!("local-fnv1a-{}", self.dim)
    }
}

/// 64-bit FNV-1a. Stored local vectors depend on it, so it must not change.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    bytes.iter().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(PRIME)
    })
}

/// Dimension of all-MiniLM-L6-v2 sentence embeddings.
pub const FASTEMBED_DIM: usize = 384;

/// all-MiniLM-L6-v2 sentence embeddings computed in-process with fastembed.
///
/// The model is downloaded and loaded on first use, so building the provider
/// is cheap and an empty collection never touches the network.
pub struct FastEmbedder {
    model: Arc<Mutex<Option<TextEmbedding>>>,
    cache_dir: Option<PathBuf>,
}

impl FastEmbedder {
    pub fn new(cache_dir: Option<PathBuf>) -> Self {
        Self {
            model: Arc::new(Mutex::new(None)),
            cache_dir,
        }
    }

    fn load(cache_dir: Option<PathBuf>) -> Result<TextEmbedding> {
        let mut options =
            TextInitOptions::new(EmbeddingModel::AllMiniLML6V2).with_show_download_progress(false);
        if let Some(dir) = cache_dir {
            options = options.with_cache_dir(dir);
        }

        let model = TextEmbedding::try_new(options)
            .map_err(|e| Error::Embedding(format!("Failed to load all-MiniLM-L6-v2: {}", e)))?;
        info!("Embedding model all-MiniLM-L6-v2 loaded");
        Ok(model)
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = Arc::clone(&self.model);
        let cache_dir = self.cache_dir.clone();
        let inputs = texts.to_vec();
        let expected = inputs.len();

        // Inference is CPU-bound and the first call may download the model.
        let embeddings = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
            let mut guard = model
                .lock()
                .map_err(|_| Error::Embedding("Embedding model lock poisoned".to_string()))?;
            if guard.is_none() {
                *guard = Some(Self::load(cache_dir)?);
            }
            let model = guard
                .as_mut()
                .ok_or_else(|| Error::Embedding("Embedding model not loaded".to_string()))?;

            model
                .embed(inputs, None)
                .map_err(|e| Error::Embedding(e.to_string()))
        })
        .await
        .map_err(|e| Error::Embedding(format!("Embedding task failed: {}", e)))??;

        if embeddings.len() != expected {
            return Err(Error::Embedding(format!(
                "fastembed returned {} embeddings for {} texts",
                embeddings.len(),
                expected
            )));
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        FASTEMBED_DIM
    }

    fn fingerprint(&self) -> String {
        "fastembed:all-MiniLM-L6-v2".to_string()
    }
}

/// Embeddings served by a local Ollama instance (`/api/embed`).
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: OllamaClient,
    model: String,
    dim: usize,
}

impl OllamaEmbedder {
    pub fn new(client: OllamaClient, model: impl Into<String>, dim: usize) -> Self {
        Self {
            client,
            model: model.into(),
            dim,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = self
            .client
            .embed(&self.model, texts)
            .await
            .map_err(|e| Error::Embedding(e.to_string()))?;

        if embeddings.len() != texts.len() {
            return Err(Error::Embedding(format!(
                "Ollama returned {} embeddings for {} texts",
                embeddings.len(),
                texts.len()
            )));
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn fingerprint(&self) -> String {
        format!("ollama:{}", self.model)
    }
}

/// Embeddings from the OpenAI API.
pub struct OpenAiEmbedder {
    client: OpenAIClient<OpenAIConfig>,
    model: String,
}

impl OpenAiEmbedder {
    /// Create an embedder using `OPENAI_API_KEY`.
    pub fn new(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Configuration("OPENAI_API_KEY not set".to_string()))?;

        let config = OpenAIConfig::new().with_api_key(api_key);

        Ok(Self {
            client: OpenAIClient::with_config(config),
            model: model.into(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        // The API rejects empty inputs, so blanks are mapped back as empty vectors.
        let processed: Vec<String> = texts
            .iter()
            .map(|t| t.trim().chars().take(8000).collect::<String>())
            .filter(|t| !t.is_empty())
            .collect();

        if processed.is_empty() {
            return Ok(vec![Vec::new(); texts.len()]);
        }

        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::StringArray(processed))
            .build()
            .map_err(|e| Error::Embedding(e.to_string()))?;

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| Error::Embedding(e.to_string()))?;

        info!(
            "Generated {} embeddings, tokens used: {}",
            response.data.len(),
            response.usage.total_tokens
        );

        merge_embeddings(texts, response.data.into_iter().map(|e| e.embedding).collect())
    }

    fn dimension(&self) -> usize {
        match self.model.as_str() {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        }
    }

    fn fingerprint(&self) -> String {
        format!("openai:{}", self.model)
    }
}

/// Put API embeddings back in input order; blank inputs get empty vectors.
fn merge_embeddings(texts: &[String], embeddings: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>> {
    let expected = texts.iter().filter(|t| !t.trim().is_empty()).count();
    if embeddings.len() != expected {
        return Err(Error::Embedding(format!(
            "OpenAI returned {} embeddings for {} texts",
            embeddings.len(),
            expected
        )));
    }

    let mut embed_iter = embeddings.into_iter();
    Ok(texts
        .iter()
        .map(|text| {
            if text.trim().is_empty() {
                Vec::new()
            } else {
                embed_iter.next().unwrap_or_default()
            }
        })
        .collect())
}

/// Cosine similarity in [-1, 1]; 0 for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;

    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
}
