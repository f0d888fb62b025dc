//! OpenAI-compatible provider implementation.
//!
//! Works with OpenAI and any endpoint exposing the same
//! `/embeddings` and `/chat/completions` surface.
//!
//! Supports:
//! - Single-text embeddings
//! - Single-shot (non-streaming) chat completions

use async_trait::async_trait;
use ctxprompt_core::error::ProviderError;
use ctxprompt_core::message::Message;
use ctxprompt_core::provider::{CompletionOptions, CompletionProvider, EmbeddingProvider};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::http::ApiClient;

pub const DEFAULT_CHAT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";

/// An OpenAI-compatible embedding and chat provider.
pub struct OpenAiProvider {
    name: String,
    chat_model: String,
    embedding_model: String,
    api: ApiClient,
}

/// Builder for [`OpenAiProvider`].
pub struct OpenAiProviderBuilder {
    name: String,
    base_url: String,
    api_key: String,
    organization: Option<String>,
    chat_model: String,
    embedding_model: String,
    timeout_secs: u64,
}

impl OpenAiProviderBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn organization(mut self, organization: Option<String>) -> Self {
        self.organization = organization;
        self
    }

    pub fn chat_model(mut self, model: impl Into<String>) -> Self {
        self.chat_model = model.into();
        self
    }

    pub fn embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn build(self) -> Result<OpenAiProvider, ProviderError> {
        let api = ApiClient::new(&self.base_url, &self.api_key, self.organization, self.timeout_secs)?;
        Ok(OpenAiProvider {
            name: self.name,
            chat_model: self.chat_model,
            embedding_model: self.embedding_model,
            api,
        })
    }
}

impl OpenAiProvider {
    pub fn builder(base_url: impl Into<String>, api_key: impl Into<String>) -> OpenAiProviderBuilder {
        OpenAiProviderBuilder {
            name: "openai".into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            organization: None,
            chat_model: DEFAULT_CHAT_MODEL.into(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.into(),
            timeout_secs: 30,
        }
    }

    /// Create an OpenAI provider with default models (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::builder("https://api.openai.com/v1", api_key).build()
    }

    pub fn chat_model(&self) -> &str {
        &self.chat_model
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    pub fn base_url(&self) -> &str {
        self.api.base_url()
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage<'_>> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let body = serde_json::json!({
            "model": self.embedding_model,
            "input": [text],
            "encoding_format": "float",
        });

        debug!(provider = %self.name, model = %self.embedding_model, "Sending embedding request");

        let resp: EmbeddingApiResponse = self.api.post_json("embeddings", &body).await?;
        let embedding = resp
            .data
            .into_iter()
            .min_by_key(|d| d.index)
            .map(|d| d.embedding)
            .ok_or_else(|| ProviderError::InvalidResponse {
                endpoint: "POST /embeddings".into(),
                message: "No embedding in response".into(),
            })?;

        if embedding.is_empty() {
            return Err(ProviderError::InvalidResponse {
                endpoint: "POST /embeddings".into(),
                message: "Embedding vector is empty".into(),
            });
        }

        Ok(embedding)
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        let model = options.model.as_deref().unwrap_or(&self.chat_model);

        let mut body = serde_json::json!({
            "model": model,
            "messages": Self::to_api_messages(messages),
            "temperature": options.temperature,
            "stream": false,
        });

        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        debug!(provider = %self.name, model = %model, messages = messages.len(), "Sending completion request");

        let resp: ChatApiResponse = self.api.post_json("chat/completions", &body).await?;

        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse {
                endpoint: "POST /chat/completions".into(),
                message: "No choices in response".into(),
            })?;

        Ok(choice.message.content.unwrap_or_default())
    }
}

// --- OpenAI API types ---

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: u32,
}
