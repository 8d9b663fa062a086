//! Generation provider collaborator.
//!
//! A provider turns `(prompt, model, temperature)` into text or a media URL.
//! [`HttpProvider`] talks to an OpenAI-compatible chat-completions endpoint;
//! [`EchoProvider`] answers locally and is used for offline runs.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// One provider invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub model: String,
    pub temperature: f32,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("response error: {0}")]
    Response(String),
    #[error("request timed out after {0}s")]
    Timeout(u64),
    /// Another generation is already in flight; retry later.
    #[error("provider busy, retry")]
    Busy,
    #[error("serialization error: {0}")]
    Serialization(String),
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ProviderError>;
}

#[async_trait]
impl GenerationProvider for Arc<dyn GenerationProvider> {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ProviderError> {
        (**self).generate(request).await
    }
}

/// Answers with the prompt it was given, prefixed by the model id.
pub struct EchoProvider;

#[async_trait]
impl GenerationProvider for EchoProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ProviderError> {
        Ok(format!("[{}] {}", request.model, request.prompt))
    }
}

/// HTTP provider config (OpenAI-compatible).
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub extra_headers: HeaderMap,
}

impl Default for HttpProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            timeout_secs: 30,
            extra_headers: HeaderMap::new(),
        }
    }
}

/// Provider using an OpenAI-compatible chat-completions API.
pub struct HttpProvider {
    client: reqwest::Client,
    config: HttpProviderConfig,
}

impl HttpProvider {
    pub fn new(config: HttpProviderConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        Ok(Self { client, config })
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: String,
}

fn parse_chat_response(text: &str) -> Result<String, ProviderError> {
    let parsed: ChatResponse =
        serde_json::from_str(text).map_err(|e| ProviderError::Serialization(e.to_string()))?;
    parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| ProviderError::Response("Missing choices".to_string()))
}

#[async_trait]
impl GenerationProvider for HttpProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ProviderError> {
        let mut headers = self.config.extra_headers.clone();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.config.api_key {
            let value = format!("Bearer {}", key);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&value).map_err(|e| ProviderError::Http(e.to_string()))?,
            );
        }

        let body = ChatRequest {
            model: request.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: request.prompt,
            }],
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(self.config.timeout_secs)
                } else {
                    ProviderError::Http(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status, body });
        }

        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        parse_chat_response(&text)
    }
}
