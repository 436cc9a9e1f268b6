//! Dialogue core: retrieval → prompt composition → generation → history.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::conversation::{ConversationState, Turn};
use crate::llm::LanguageModel;
use crate::metrics;
use crate::prompts::{Evidence, PromptComposer};
use crate::rag::Retriever;
use crate::{Error, Result};

/// Reply returned when the model could not produce an answer.
pub const FALLBACK_REPLY: &str = "I'm sorry, I encountered an error while processing your request.";

pub const DEFAULT_MAX_RESULTS: usize = 3;
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.4;

/// Per-turn operational parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DialogueSettings {
    pub max_results: usize,
    pub min_similarity: f32,
    pub generation_timeout: Option<Duration>,
}

impl Default for DialogueSettings {
    fn default() -> Self {
        Self {
            max_results: DEFAULT_MAX_RESULTS,
            min_similarity: DEFAULT_MIN_SIMILARITY,
            generation_timeout: None,
        }
    }
}

/// One conversation with retrieval-augmented answers.
pub struct DialogueCore<R, M> {
    retriever: R,
    model: M,
    composer: PromptComposer,
    history: ConversationState,
    settings: DialogueSettings,
}

impl<R: Retriever, M: LanguageModel> DialogueCore<R, M> {
    pub fn new(retriever: R, model: M) -> Self {
        Self {
            retriever,
            model,
            composer: PromptComposer::new(),
            history: ConversationState::new(),
            settings: DialogueSettings::default(),
        }
    }

    pub fn with_composer(mut self, composer: PromptComposer) -> Self {
        self.composer = composer;
        self
    }

    pub fn with_settings(mut self, settings: DialogueSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &DialogueSettings {
        &self.settings
    }

    pub fn history(&self) -> &[Turn] {
        self.history.snapshot()
    }

    /// Answer one user message.
    ///
    /// Never fails: if the model is unavailable the fixed apology is returned
    /// and nothing is recorded in the history.
    pub async fn process_message(&mut self, user_text: &str) -> String {
        let started = Instant::now();

        let chunks = self
            .retriever
            .retrieve(
                user_text,
                self.settings.max_results,
                self.settings.min_similarity,
            )
            .await;
        metrics::record_retrieval(chunks.len());

        let evidence = Evidence::from(chunks);
        match &evidence {
            Evidence::Grounded(chunks) => {
                let titles: Vec<&str> = chunks
                    .iter()
                    .map(|c| c.title().unwrap_or("untitled"))
                    .collect();
                debug!("Grounding answer on {} documents: {:?}", chunks.len(), titles);
            }
            Evidence::Ungrounded => {
                info!("No relevant context found, falling back to general knowledge");
            }
        }

        let prompt = self.composer.compose(user_text, &evidence);

        let mut messages = self.history.snapshot().to_vec();
        messages.push(Turn::user(prompt.text));

        match self.generate(&messages).await {
            Ok(reply) => {
                self.history.append(user_text, reply.as_str());
                metrics::record_turn(prompt.mode.as_str(), started.elapsed(), true);
                reply
            }
            Err(err) => {
                warn!(model = self.model.name(), "Generation failed: {}", err);
                metrics::record_turn(prompt.mode.as_str(), started.elapsed(), false);
                FALLBACK_REPLY.to_string()
            }
        }
    }

    /// Forget the conversation so far.
    pub fn reset_conversation(&mut self) {
        self.history.reset();
        info!("Chat history reset");
    }

    async fn generate(&self, messages: &[Turn]) -> Result<String> {
        match self.settings.generation_timeout {
            Some(limit) => tokio::time::timeout(limit, self.model.generate(messages))
                .await
                .map_err(|_| Error::Timeout(format!("generation after {:?}", limit)))?,
            None => self.model.generate(messages).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::{EvidenceChunk, RetrievalResult};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    struct StaticRetriever {
        chunks: Vec<EvidenceChunk>,
    }

    #[async_trait]
    impl Retriever for StaticRetriever {
        async fn retrieve(&self, _query: &str, max_results: usize, min_similarity: f32) -> RetrievalResult {
            self.chunks
                .iter()
                .filter(|c| c.similarity >= min_similarity)
                .take(max_results)
                .cloned()
                .collect()
        }
    }

    /// Records every message list it receives; fails when `fail` is set.
    #[derive(Clone, Default)]
    struct RecordingModel {
        calls: Arc<Mutex<Vec<Vec<Turn>>>>,
        fail: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl LanguageModel for RecordingModel {
        async fn generate(&self, messages: &[Turn]) -> Result<String> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(messages.to_vec());
            if *self.fail.lock().unwrap() {
                return Err(Error::ModelUnavailable("model not found".into()));
            }
            Ok(format!("reply {}", calls.len()))
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    struct HangingModel;

    #[async_trait]
    impl LanguageModel for HangingModel {
        async fn generate(&self, _messages: &[Turn]) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("too late".into())
        }

        fn name(&self) -> &str {
            "hanging"
        }
    }

    fn chunk(content: &str, similarity: f32) -> EvidenceChunk {
        EvidenceChunk {
            content: content.into(),
            metadata: HashMap::from([("title".to_string(), "Balanced Diet".to_string())]),
            similarity,
        }
    }

    fn core(chunks: Vec<EvidenceChunk>) -> (DialogueCore<StaticRetriever, RecordingModel>, RecordingModel) {
        let model = RecordingModel::default();
        (
            DialogueCore::new(StaticRetriever { chunks }, model.clone()),
            model,
        )
    }

    #[tokio::test]
    async fn successful_turn_is_recorded() {
        let (mut dialogue, _) = core(Vec::new());

        let reply = dialogue.process_message("hello").await;

        assert_eq!(reply, "reply 1");
        assert_eq!(dialogue.history(), &[Turn::user("hello"), Turn::assistant("reply 1")]);
    }

    #[tokio::test]
    async fn model_receives_composed_prompt_not_raw_text() {
        let (mut dialogue, model) = core(vec![chunk("Eat vegetables.", 0.9)]);

        dialogue.process_message("Tell me about diet").await;

        let calls = model.calls.lock().unwrap();
        let last = calls[0].last().unwrap();
        assert_eq!(last.role, crate::conversation::Role::User);
        assert_ne!(last.content, "Tell me about diet");
        assert!(last.content.contains("Eat vegetables."));
        assert!(last.content.ends_with("User's Question: Tell me about diet"));
    }

    #[tokio::test]
    async fn history_precedes_new_prompt() {
        let (mut dialogue, model) = core(Vec::new());

        dialogue.process_message("first").await;
        dialogue.process_message("second").await;

        let calls = model.calls.lock().unwrap();
        let second_call = &calls[1];
        assert_eq!(second_call.len(), 3);
        assert_eq!(second_call[0], Turn::user("first"));
        assert_eq!(second_call[1], Turn::assistant("reply 1"));
        assert!(second_call[2].content.ends_with("User's Question: second"));
    }

    #[tokio::test]
    async fn n_turns_yield_2n_history() {
        let (mut dialogue, _) = core(vec![chunk("Eat vegetables.", 0.9)]);

        for i in 0..7 {
            dialogue.process_message(&format!("question {i}")).await;
            assert_eq!(dialogue.history().len(), 2 * (i + 1));
        }
    }

    #[tokio::test]
    async fn model_failure_returns_apology_and_keeps_history() {
        let (mut dialogue, model) = core(Vec::new());
        dialogue.process_message("ok").await;
        let before = dialogue.history().len();

        *model.fail.lock().unwrap() = true;
        let reply = dialogue.process_message("will fail").await;

        assert_eq!(reply, FALLBACK_REPLY);
        assert_eq!(dialogue.history().len(), before);
        assert!(dialogue.history().iter().all(|t| t.content != FALLBACK_REPLY));
    }

    #[tokio::test(start_paused = true)]
    async fn generation_timeout_returns_apology() {
        let mut dialogue = DialogueCore::new(StaticRetriever { chunks: Vec::new() }, HangingModel)
            .with_settings(DialogueSettings {
                generation_timeout: Some(Duration::from_secs(5)),
                ..Default::default()
            });

        let reply = dialogue.process_message("hello").await;

        assert_eq!(reply, FALLBACK_REPLY);
        assert!(dialogue.history().is_empty());
    }

    #[tokio::test]
    async fn reset_clears_history() {
        let (mut dialogue, _) = core(Vec::new());
        dialogue.process_message("one").await;
        dialogue.process_message("two").await;

        dialogue.reset_conversation();

        assert!(dialogue.history().is_empty());
    }

    #[tokio::test]
    async fn threshold_from_settings_is_applied() {
        let model = RecordingModel::default();
        let mut dialogue = DialogueCore::new(
            StaticRetriever {
                chunks: vec![chunk("Weak match.", 0.3)],
            },
            model.clone(),
        );

        dialogue.process_message("diet").await;
        assert!(!model.calls.lock().unwrap()[0][0].content.contains("Weak match."));

        let mut relaxed = DialogueCore::new(
            StaticRetriever {
                chunks: vec![chunk("Weak match.", 0.3)],
            },
            model.clone(),
        )
        .with_settings(DialogueSettings {
            min_similarity: 0.2,
            ..Default::default()
        });

        relaxed.process_message("diet").await;
        assert!(model.calls.lock().unwrap()[1][0].content.contains("Weak match."));
    }

    #[test]
    fn default_settings() {
        let settings = DialogueSettings::default();
        assert_eq!(settings.max_results, 3);
        assert!((settings.min_similarity - 0.4).abs() < f32::EPSILON);
        assert!(settings.generation_timeout.is_none());
    }
}
