//! Building the assistant from configuration.
//!
//! Shared by the chat REPL and `kb_query` so both resolve the same embedder,
//! store and collection.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{Config, EmbeddingBackend, StoreBackend};
use crate::dialogue::DialogueCore;
use crate::integrations::{OllamaClient, OllamaModel};
use crate::prompts::{PromptComposer, PromptTemplates};
use crate::rag::{
    EmbeddingProvider, FastEmbedder, KnowledgeBase, LocalEmbedder, LocalVectorStore, OllamaEmbedder,
    OpenAiEmbedder, QdrantStore, VectorRetriever, VectorStore,
};
use crate::Result;

/// The assistant as wired by the binaries.
pub type Assistant = DialogueCore<VectorRetriever, OllamaModel>;

/// Embedding provider selected by `embeddings.backend`.
pub fn build_embedder(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    let embedder: Arc<dyn EmbeddingProvider> = match &config.embeddings {
        EmbeddingBackend::FastEmbed { cache_dir } => Arc::new(FastEmbedder::new(cache_dir.clone())),
        EmbeddingBackend::Local { dimension } => Arc::new(LocalEmbedder::new(*dimension)),
        EmbeddingBackend::Ollama { model, dimension } => {
            let client = OllamaClient::with_url(&config.ollama_url)?;
            Arc::new(OllamaEmbedder::new(client, model.clone(), *dimension))
        }
        EmbeddingBackend::OpenAi { model } => Arc::new(OpenAiEmbedder::new(model.clone())?),
    };
    Ok(embedder)
}

/// Vector store selected by `vector_store.backend`.
pub async fn open_store(
    config: &Config,
    embedder: Arc<dyn EmbeddingProvider>,
) -> Result<Arc<dyn VectorStore>> {
    match &config.vector_store {
        StoreBackend::Local => {
            let store =
                LocalVectorStore::open(&config.storage_dir, &config.collection, embedder).await?;
            info!("Using local vector store at {}", store.path().display());
            Ok(Arc::new(store))
        }
        StoreBackend::Qdrant { url } => {
            let store = QdrantStore::connect(url, &config.collection, embedder).await?;
            info!("Using Qdrant collection '{}' at {}", config.collection, url);
            Ok(Arc::new(store))
        }
    }
}

/// Replace the collection contents with the configured knowledge file.
pub async fn ingest_knowledge(config: &Config, store: &dyn VectorStore) -> Result<usize> {
    let stored = KnowledgeBase::rebuild_from_file(store, &config.knowledge_file).await?;
    if stored == 0 {
        warn!(
            "Knowledge file {} has no records; answers will be ungrounded",
            config.knowledge_file.display()
        );
    }
    Ok(stored)
}

pub fn build_retriever(config: &Config, store: Arc<dyn VectorStore>) -> VectorRetriever {
    let retriever = VectorRetriever::new(store);
    match config.retrieval_timeout() {
        Some(limit) => retriever.with_timeout(limit),
        None => retriever,
    }
}

/// Composer with overrides from `prompts.dir`, if configured.
pub fn load_composer(config: &Config) -> Result<PromptComposer> {
    let templates = match &config.prompts_dir {
        Some(dir) => PromptTemplates::load_from_dir(dir)?,
        None => PromptTemplates::default(),
    };
    Ok(PromptComposer::with_templates(templates))
}

/// Connect to Ollama and check the configured model answers.
pub async fn connect_model(config: &Config) -> Result<OllamaModel> {
    let client =
        OllamaClient::with_timeout(&config.ollama_url, config.dialogue_settings().generation_timeout)?;
    OllamaModel::connect(client, config.model_name.clone(), config.chat_options()).await
}

/// Assemble the dialogue core over an already opened store.
pub async fn build_assistant(config: &Config, store: Arc<dyn VectorStore>) -> Result<Assistant> {
    let model = connect_model(config).await?;
    let composer = load_composer(config)?;

    Ok(DialogueCore::new(build_retriever(config, store), model)
        .with_composer(composer)
        .with_settings(config.dialogue_settings()))
}
