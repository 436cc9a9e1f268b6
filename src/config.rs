//! Configuration for the chat assistant
//!
//! Loads configuration from config.yml; `.env` and environment variables
//! take precedence over file values.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dialogue::{DialogueSettings, DEFAULT_MAX_RESULTS, DEFAULT_MIN_SIMILARITY};
use crate::integrations::ollama::{ChatOptions, OLLAMA_URL};
use crate::{Error, Result};

/// Default constants (fallback if config.yml not found)
pub const DEFAULT_MODEL: &str = "qwen:1.8b-chat";
pub const DEFAULT_KNOWLEDGE_FILE: &str = "data/knowledge_base.txt";
pub const DEFAULT_COLLECTION: &str = "nilecare_knowledge";
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6334";
pub const DEFAULT_EMBEDDING_DIM: usize = 384;
pub const DEFAULT_RETRIEVAL_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 120;
const STORAGE_DIR_NAME: &str = "vector_store";

/// Which embedding provider to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingBackend {
    /// all-MiniLM-L6-v2 run in-process; model files cached in `cache_dir`
    FastEmbed { cache_dir: Option<PathBuf> },
    /// Deterministic hashing embedder, no network; lexical matches only
    Local { dimension: usize },
    /// Ollama `/api/embed`
    Ollama { model: String, dimension: usize },
    /// OpenAI embeddings API
    OpenAi { model: String },
}

/// Which vector store to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// JSON file under the storage directory
    Local,
    /// Qdrant server
    Qdrant { url: String },
}

/// YAML config structures
#[derive(Debug, Default, Deserialize)]
struct YamlConfig {
    ollama: Option<OllamaSection>,
    knowledge: Option<KnowledgeSection>,
    retrieval: Option<RetrievalSection>,
    embeddings: Option<EmbeddingsSection>,
    vector_store: Option<VectorStoreSection>,
    prompts: Option<PromptsSection>,
}

#[derive(Debug, Default, Deserialize)]
struct OllamaSection {
    url: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    num_predict: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct KnowledgeSection {
    file: Option<String>,
    storage_dir: Option<String>,
    collection: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RetrievalSection {
    max_results: Option<usize>,
    min_similarity: Option<f32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct EmbeddingsSection {
    backend: Option<String>,
    model: Option<String>,
    dimension: Option<usize>,
    cache_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct VectorStoreSection {
    backend: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PromptsSection {
    dir: Option<String>,
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct Config {
    pub ollama_url: String,
    pub model_name: String,
    pub temperature: f32,
    pub num_predict: u32,
    pub knowledge_file: PathBuf,
    pub storage_dir: PathBuf,
    pub collection: String,
    pub max_results: usize,
    pub min_similarity: f32,
    pub retrieval_timeout_secs: u64,
    pub generation_timeout_secs: u64,
    pub embeddings: EmbeddingBackend,
    pub vector_store: StoreBackend,
    pub prompts_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults()
    }
}

impl Config {
    /// Load configuration from config.yml (or ../config.yml), else defaults.
    ///
    /// A config file that exists but cannot be parsed is an error.
    pub fn new() -> Result<Self> {
        for candidate in ["config.yml", "../config.yml"] {
            if Path::new(candidate).exists() {
                return Self::load_from_file(candidate);
            }
        }

        Self::load_dotenv();
        Self::from_yaml(YamlConfig::default())
    }

    /// Resolve a value: `${VAR}` placeholders and `env_key` take precedence
    fn resolve_env_string(value: Option<String>, env_key: &str) -> Option<String> {
        if let Some(ref v) = value {
            if v.starts_with("${") && v.ends_with('}') {
                let var_name = &v[2..v.len() - 1];
                if let Ok(env_val) = std::env::var(var_name) {
                    return Some(env_val);
                }
            }
        }
        if let Ok(env_val) = std::env::var(env_key) {
            if !env_val.is_empty() {
                return Some(env_val);
            }
        }
        value.filter(|v| !(v.starts_with("${") && v.ends_with('}')))
    }

    /// Load .env file into environment variables using dotenvy
    fn load_dotenv() {
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_filename("../.env");
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_dotenv();

        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        // An empty file deserializes to unit, not to a map.
        let yaml: YamlConfig = if content.trim().is_empty() {
            YamlConfig::default()
        } else {
            serde_yaml::from_str(&content).map_err(|e| {
                Error::Configuration(format!("Failed to parse config file: {}", e))
            })?
        };

        Self::from_yaml(yaml)
    }

    fn from_yaml(yaml: YamlConfig) -> Result<Self> {
        let ollama = yaml.ollama.unwrap_or_default();
        let knowledge = yaml.knowledge.unwrap_or_default();
        let retrieval = yaml.retrieval.unwrap_or_default();
        let embeddings = yaml.embeddings.unwrap_or_default();
        let vector_store = yaml.vector_store.unwrap_or_default();
        let prompts = yaml.prompts.unwrap_or_default();

        let knowledge_file = PathBuf::from(
            Self::resolve_env_string(knowledge.file, "NILECARE_KNOWLEDGE_FILE")
                .unwrap_or_else(|| DEFAULT_KNOWLEDGE_FILE.to_string()),
        );
        let storage_dir = match Self::resolve_env_string(knowledge.storage_dir, "NILECARE_STORAGE_DIR")
        {
            Some(dir) => PathBuf::from(dir),
            None => derive_storage_dir(&knowledge_file),
        };

        let embedding_backend = match embeddings
            .backend
            .as_deref()
            .unwrap_or("fastembed")
            .to_lowercase()
            .as_str()
        {
            "fastembed" => EmbeddingBackend::FastEmbed {
                cache_dir: embeddings.cache_dir.map(PathBuf::from),
            },
            "local" => EmbeddingBackend::Local {
                dimension: embeddings.dimension.unwrap_or(DEFAULT_EMBEDDING_DIM),
            },
            "ollama" => EmbeddingBackend::Ollama {
                model: embeddings
                    .model
                    .unwrap_or_else(|| "nomic-embed-text".to_string()),
                dimension: embeddings.dimension.unwrap_or(768),
            },
            "openai" => EmbeddingBackend::OpenAi {
                model: embeddings
                    .model
                    .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            },
            other => {
                return Err(Error::Configuration(format!(
                    "Unknown embeddings backend '{}' (expected fastembed | local | ollama | openai)",
                    other
                )))
            }
        };

        let store_backend = match vector_store
            .backend
            .as_deref()
            .unwrap_or("local")
            .to_lowercase()
            .as_str()
        {
            "local" => StoreBackend::Local,
            "qdrant" => StoreBackend::Qdrant {
                url: Self::resolve_env_string(vector_store.url, "QDRANT_URL")
                    .unwrap_or_else(|| DEFAULT_QDRANT_URL.to_string()),
            },
            other => {
                return Err(Error::Configuration(format!(
                    "Unknown vector store backend '{}' (expected local | qdrant)",
                    other
                )))
            }
        };

        let config = Self {
            ollama_url: Self::resolve_env_string(ollama.url, "OLLAMA_URL")
                .unwrap_or_else(|| OLLAMA_URL.to_string()),
            model_name: Self::resolve_env_string(ollama.model, "OLLAMA_MODEL_NAME")
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            temperature: ollama.temperature.unwrap_or(0.6),
            num_predict: ollama.num_predict.unwrap_or(256),
            knowledge_file,
            storage_dir,
            collection: knowledge
                .collection
                .unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
            max_results: retrieval.max_results.unwrap_or(DEFAULT_MAX_RESULTS),
            min_similarity: retrieval.min_similarity.unwrap_or(DEFAULT_MIN_SIMILARITY),
            retrieval_timeout_secs: retrieval
                .timeout_secs
                .unwrap_or(DEFAULT_RETRIEVAL_TIMEOUT_SECS),
            generation_timeout_secs: ollama
                .timeout_secs
                .unwrap_or(DEFAULT_GENERATION_TIMEOUT_SECS),
            embeddings: embedding_backend,
            vector_store: store_backend,
            prompts_dir: prompts.dir.map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    /// Create config with built-in defaults
    fn defaults() -> Self {
        let knowledge_file = PathBuf::from(DEFAULT_KNOWLEDGE_FILE);
        Self {
            ollama_url: OLLAMA_URL.to_string(),
            model_name: DEFAULT_MODEL.to_string(),
            temperature: 0.6,
            num_predict: 256,
            storage_dir: derive_storage_dir(&knowledge_file),
            knowledge_file,
            collection: DEFAULT_COLLECTION.to_string(),
            max_results: DEFAULT_MAX_RESULTS,
            min_similarity: DEFAULT_MIN_SIMILARITY,
            retrieval_timeout_secs: DEFAULT_RETRIEVAL_TIMEOUT_SECS,
            generation_timeout_secs: DEFAULT_GENERATION_TIMEOUT_SECS,
            embeddings: EmbeddingBackend::FastEmbed { cache_dir: None },
            vector_store: StoreBackend::Local,
            prompts_dir: None,
        }
    }

    /// Reject values the retrieval and generation steps cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_similarity) {
            return Err(Error::Configuration(format!(
                "min_similarity must be within [0, 1], got {}",
                self.min_similarity
            )));
        }
        if self.max_results == 0 {
            return Err(Error::Configuration(
                "max_results must be at least 1".to_string(),
            ));
        }
        if self.model_name.trim().is_empty() {
            return Err(Error::Configuration("model name is empty".to_string()));
        }
        if self.collection.trim().is_empty() {
            return Err(Error::Configuration("collection name is empty".to_string()));
        }
        Ok(())
    }

    /// Sampling options for the chat model.
    pub fn chat_options(&self) -> ChatOptions {
        ChatOptions {
            temperature: self.temperature,
            num_predict: self.num_predict,
        }
    }

    /// Per-turn settings for the dialogue core.
    pub fn dialogue_settings(&self) -> DialogueSettings {
        DialogueSettings {
            max_results: self.max_results,
            min_similarity: self.min_similarity,
            generation_timeout: timeout(self.generation_timeout_secs),
        }
    }

    /// Timeout for a single vector store query, if any.
    pub fn retrieval_timeout(&self) -> Option<Duration> {
        timeout(self.retrieval_timeout_secs)
    }
}

/// Zero disables the timeout.
fn timeout(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Storage lives next to the directory holding the knowledge file:
/// `data/kb/knowledge.txt` → `data/vector_store`. Paths without a grandparent
/// fall back to `data/vector_store`.
pub fn derive_storage_dir(knowledge_file: &Path) -> PathBuf {
    match knowledge_file.parent().and_then(Path::parent) {
        Some(base) if !base.as_os_str().is_empty() => base.join(STORAGE_DIR_NAME),
        _ => PathBuf::from("data").join(STORAGE_DIR_NAME),
    }
}
