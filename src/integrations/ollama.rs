//! Ollama client for local LLM inference and embeddings.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::conversation::Turn;
use crate::llm::LanguageModel;
use crate::{Error, Result};

pub const OLLAMA_URL: &str = "http://localhost:11434";

/// Default request timeout for clients built with [`OllamaClient::with_url`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Ollama HTTP client.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: Client,
    base_url: String,
    timeout: Option<Duration>,
}

impl OllamaClient {
    /// Create new client with default URL.
    pub fn new() -> Result<Self> {
        Self::with_url(OLLAMA_URL)
    }

    /// Create client with custom URL.
    pub fn with_url(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, Some(DEFAULT_TIMEOUT))
    }

    /// Create client with custom URL and request timeout; `None` waits
    /// indefinitely.
    pub fn with_timeout(base_url: &str, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(limit) = timeout {
            builder = builder.timeout(limit);
        }
        let http = builder
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Request timeout applied to every call, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Check if Ollama server is running.
    pub async fn is_running(&self) -> bool {
        self.http
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    /// List available models.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(|e| Error::ModelUnavailable(format!("Ollama request failed: {}", e)))?;

        let tags: TagsResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::ModelUnavailable(format!("Invalid response: {}", e)))?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Chat with model.
    pub async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        model: &str,
        options: ChatOptions,
    ) -> Result<String> {
        let request = ChatRequest {
            model: model.to_string(),
            messages,
            stream: false,
            options,
        };

        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(request_error)?;

        let result: ChatResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::ModelUnavailable(format!("Invalid response: {}", e)))?;

        Ok(result.message.content)
    }

    /// Embed texts with an embedding model.
    pub async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: model.to_string(),
            input: texts.to_vec(),
        };

        let response = self
            .http
            .post(format!("{}/api/embed", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(request_error)?;

        let result: EmbedResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::ModelUnavailable(format!("Invalid response: {}", e)))?;

        Ok(result.embeddings)
    }
}

fn request_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout(format!("Ollama request timed out: {}", err))
    } else {
        Error::ModelUnavailable(format!("Ollama request failed: {}", err))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    Err(Error::ModelUnavailable(format!(
        "Ollama error {}: {}",
        status, text
    )))
}

/// Chat model served by Ollama.
#[derive(Debug, Clone)]
pub struct OllamaModel {
    client: OllamaClient,
    model: String,
    options: ChatOptions,
}

impl OllamaModel {
    pub fn client(&self) -> &OllamaClient {
        &self.client
    }

    pub fn new(client: OllamaClient, model: impl Into<String>, options: ChatOptions) -> Self {
        Self {
            client,
            model: model.into(),
            options,
        }
    }

    /// Create the model and verify the server answers with it.
    ///
    /// Sends a one-token check request, so an unreachable server or an unknown model
    /// is reported here instead of on the first user message.
    pub async fn connect(
        client: OllamaClient,
        model: impl Into<String>,
        options: ChatOptions,
    ) -> Result<Self> {
        let this = Self::new(client, model, options);

        let ping = vec![ChatMessage {
            role: "user".to_string(),
            content: "Hi".to_string(),
        }];
        let ping_options = ChatOptions {
            num_predict: 1,
            ..this.options
        };

        this.client
            .chat(ping, &this.model, ping_options)
            .await
            .map_err(|e| {
                Error::ModelUnavailable(format!(
                    "{} (ensure the Ollama server is running and model '{}' is downloaded)",
                    e, this.model
                ))
            })?;

        info!("Ollama client initialized with model: {}", this.model);
        Ok(this)
    }
}

#[async_trait]
impl LanguageModel for OllamaModel {
    async fn generate(&self, messages: &[Turn]) -> Result<String> {
        let messages = messages.iter().map(ChatMessage::from).collect();
        self.client.chat(messages, &self.model, self.options).await
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl From<&Turn> for ChatMessage {
    fn from(turn: &Turn) -> Self {
        Self {
            role: turn.role.as_str().to_string(),
            content: turn.content.clone(),
        }
    }
}

/// Sampling options sent with every chat request.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ChatOptions {
    pub temperature: f32,
    pub num_predict: u32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: 0.6,
            num_predict: 256,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    name: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(server: &MockServer) -> OllamaClient {
        OllamaClient::with_url(&server.base_url()).unwrap()
    }

    #[tokio::test]
    async fn list_models_returns_names() {
        let server = MockServer::start_async().await;

        let tags_mock = server.mock(|when, then| {
            when.method(GET).path("/api/tags");
            then.status(200).json_body(json!({
                "models": [
                    { "name": "qwen:1.8b-chat" },
                    { "name": "llama3:latest" }
                ]
            }));
        });

        let models = client(&server).list_models().await.unwrap();

        assert_eq!(
            models,
            vec!["qwen:1.8b-chat".to_string(), "llama3:latest".to_string()]
        );
        tags_mock.assert_calls(1);
    }

    #[tokio::test]
    async fn chat_returns_assistant_message() {
        let server = MockServer::start_async().await;

        let chat_mock = server.mock(|when, then| {
            when.method(POST).path("/api/chat");
            then.status(200).json_body(json!({
                "message": {
                    "role": "assistant",
                    "content": "Hello!"
                }
            }));
        });

        let reply = client(&server)
            .chat(
                vec![ChatMessage {
                    role: "user".into(),
                    content: "Hi".into(),
                }],
                "qwen:1.8b-chat",
                ChatOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(reply, "Hello!");
        chat_mock.assert_calls(1);
    }

    #[tokio::test]
    async fn chat_sends_sampling_options() {
        let server = MockServer::start_async().await;

        let chat_mock = server.mock(|when, then| {
            when.method(POST).path("/api/chat").matches(|req| {
                let body: serde_json::Value =
                    serde_json::from_slice(req.body().as_ref()).unwrap();
                body["stream"] == json!(false) && body["options"]["num_predict"] == json!(256)
            });
            then.status(200).json_body(json!({
                "message": { "role": "assistant", "content": "ok" }
            }));
        });

        client(&server)
            .chat(Vec::new(), "qwen:1.8b-chat", ChatOptions::default())
            .await
            .unwrap();

        chat_mock.assert_calls(1);
    }

    #[tokio::test]
    async fn chat_reports_model_unavailable_on_http_failure() {
        let server = MockServer::start_async().await;

        let chat_mock = server.mock(|when, then| {
            when.method(POST).path("/api/chat");
            then.status(404).body("model 'missing' not found");
        });

        let err = client(&server)
            .chat(Vec::new(), "missing", ChatOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ModelUnavailable(_)));
        let msg = format!("{err}");
        assert!(msg.contains("Ollama error 404"));
        assert!(msg.contains("not found"));
        chat_mock.assert_calls(1);
    }

    #[tokio::test]
    async fn connect_sends_single_token_request() {
        let server = MockServer::start_async().await;

        let ping_mock = server.mock(|when, then| {
            when.method(POST).path("/api/chat").matches(|req| {
                let body: serde_json::Value =
                    serde_json::from_slice(req.body().as_ref()).unwrap();
                body["options"]["num_predict"] == json!(1)
            });
            then.status(200).json_body(json!({
                "message": { "role": "assistant", "content": "H" }
            }));
        });

        let model = OllamaModel::connect(client(&server), "qwen:1.8b-chat", ChatOptions::default())
            .await
            .unwrap();

        assert_eq!(model.name(), "qwen:1.8b-chat");
        ping_mock.assert_calls(1);
    }

    #[tokio::test]
    async fn connect_fails_for_unknown_model() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/api/chat");
            then.status(404).body("model not found");
        });

        let err = OllamaModel::connect(client(&server), "nope", ChatOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ModelUnavailable(_)));
        assert!(err.to_string().contains("'nope'"));
    }

    #[tokio::test]
    async fn generate_maps_turns_to_messages() {
        let server = MockServer::start_async().await;

        let chat_mock = server.mock(|when, then| {
            when.method(POST).path("/api/chat").matches(|req| {
                let body: serde_json::Value =
                    serde_json::from_slice(req.body().as_ref()).unwrap();
                body["messages"]
                    == json!([
                        { "role": "user", "content": "q1" },
                        { "role": "assistant", "content": "a1" },
                        { "role": "user", "content": "q2" }
                    ])
            });
            then.status(200).json_body(json!({
                "message": { "role": "assistant", "content": "a2" }
            }));
        });

        let model = OllamaModel::new(client(&server), "qwen:1.8b-chat", ChatOptions::default());
        let reply = model
            .generate(&[Turn::user("q1"), Turn::assistant("a1"), Turn::user("q2")])
            .await
            .unwrap();

        assert_eq!(reply, "a2");
        chat_mock.assert_calls(1);
    }

    #[tokio::test]
    async fn embed_returns_vectors() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/api/embed");
            then.status(200)
                .json_body(json!({ "embeddings": [[0.1, 0.2, 0.3]] }));
        });

        let vectors = client(&server)
            .embed("nomic-embed-text", &["hello".to_string()])
            .await
            .unwrap();

        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].len(), 3);
    }

    #[tokio::test]
    async fn is_running_respects_http_status() {
        let healthy = MockServer::start_async().await;
        healthy.mock(|when, then| {
            when.method(GET).path("/api/tags");
            then.status(200);
        });

        let failing = MockServer::start_async().await;
        failing.mock(|when, then| {
            when.method(GET).path("/api/tags");
            then.status(503);
        });

        assert!(client(&healthy).is_running().await);
        assert!(!client(&failing).is_running().await);
    }

    #[test]
    fn with_url_applies_default_timeout() {
        let client = OllamaClient::with_url("http://localhost:11434").unwrap();
        assert_eq!(client.timeout(), Some(DEFAULT_TIMEOUT));
    }

    #[tokio::test]
    async fn client_without_timeout_waits_for_slow_responses() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/api/chat");
            then.status(200)
                .delay(Duration::from_millis(300))
                .json_body(json!({
                    "message": { "role": "assistant", "content": "slow answer" }
                }));
        });

        let unbounded = OllamaClient::with_timeout(&server.base_url(), None).unwrap();
        assert_eq!(unbounded.timeout(), None);
        let reply = unbounded
            .chat(Vec::new(), "qwen:1.8b-chat", ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(reply, "slow answer");

        let bounded =
            OllamaClient::with_timeout(&server.base_url(), Some(Duration::from_millis(50)))
                .unwrap();
        let err = bounded
            .chat(Vec::new(), "qwen:1.8b-chat", ChatOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn with_url_trims_trailing_slash() {
        let client = OllamaClient::with_url("http://localhost:11434/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:11434");
    }
}
