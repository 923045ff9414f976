use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::services::gate::ProviderError;

/// Computes text embeddings
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

/// Runs one chat completion and returns the assistant message content
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, ProviderError>;
}

/// Connection settings for an OpenAI-compatible API
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: String,
    pub embedding_model: String,
    /// Requested embedding width
    pub embedding_dimensions: u32,
    pub chat_model: String,
    pub temperature: f32,
    /// Per-request timeout; should match the gate's call timeout
    pub request_timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimensions: 768,
            chat_model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            request_timeout: Duration::from_millis(700),
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    dimensions: u32,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// HTTP client for the embedding and chat endpoints
///
/// Retries are not handled here; every call goes through the gate.
pub struct OpenAiClient {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(8)
            .build()
            .map_err(|e| ProviderError::Connection(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, ProviderError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&text)
                .map(|body| body.error.message)
                .unwrap_or(text);
            return Err(ProviderError::from_status(status.as_u16(), message));
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let request = EmbeddingRequest {
            model: &self.config.embedding_model,
            input: text,
            dimensions: self.config.embedding_dimensions,
        };

        let response: EmbeddingResponse = self.post("embeddings", &request).await?;

        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ProviderError::InvalidResponse("No embedding returned".to_string()))
    }
}

#[async_trait]
impl ChatProvider for OpenAiClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model: &self.config.chat_model,
            messages: [
                ChatMessage { role: "system", content: system_prompt },
                ChatMessage { role: "user", content: user_prompt },
            ],
            temperature: self.config.temperature,
        };

        let response: ChatResponse = self.post("chat/completions", &request).await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse("No completion content".to_string()))
    }
}
