//! OpenAI-compatible chat completion and embedding provider.
//!
//! Speaks the `/v1/chat/completions` and `/v1/embeddings` API shape, so it
//! also works against compatible gateways when given a custom base URL.

use crate::client::{
    ChatChunk, ChatMessage, ChatRequest, ChatResponse, ChatStream, LlmClient, TokenUsage,
};
use fraudlens_core::config::LLM_TIMEOUT_SECS;
use fraudlens_core::{AppError, AppResult};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// OpenAI API chat request format.
#[derive(Debug, Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

/// OpenAI API chat response format.
#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    model: String,
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Streaming chunk format (`data:` payloads).
#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    choices: Vec<OpenAiStreamChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI embeddings request format.
#[derive(Debug, Serialize)]
struct OpenAiEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingItem {
    embedding: Vec<f32>,
}

/// OpenAI-compatible client.
pub struct OpenAiClient {
    base_url: String,
    api_key: String,
    embedding_model: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    /// Create a new client against the default API endpoint.
    pub fn new(api_key: impl Into<String>, embedding_model: impl Into<String>) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, api_key, embedding_model)
    }

    /// Create a new client with a custom base URL.
    pub fn with_base_url(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            embedding_model: embedding_model.into(),
            client: reqwest::Client::new(),
        }
    }

    fn to_openai_request<'a>(&self, request: &'a ChatRequest, stream: bool) -> OpenAiChatRequest<'a> {
        OpenAiChatRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
        }
    }

    fn request_timeout(request: &ChatRequest) -> Duration {
        Duration::from_secs(request.timeout_secs.unwrap_or(LLM_TIMEOUT_SECS))
    }

    async fn error_for_status(response: reqwest::Response) -> AppResult<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(AppError::Llm(format!(
            "OpenAI API error ({}): {}",
            status, error_text
        )))
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAiClient {
    fn provider_name(&self) -> &str {
        "openai"
    }

    async fn chat(&self, request: &ChatRequest) -> AppResult<ChatResponse> {
        tracing::debug!("Sending completion request to OpenAI ({})", request.model);

        let body = self.to_openai_request(request, false);
        let url = format!("{}/v1/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(Self::request_timeout(request))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Llm(format!("Failed to send request to OpenAI: {}", e)))?;

        let response = Self::error_for_status(response).await?;

        let parsed: OpenAiChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::Llm(format!("Failed to parse OpenAI response: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::Llm("OpenAI response contained no choices".to_string()))?;

        let usage = parsed.usage.unwrap_or_default();

        Ok(ChatResponse {
            content: content.trim().to_string(),
            model: parsed.model,
            usage: TokenUsage::new(usage.prompt_tokens, usage.completion_tokens),
        })
    }

    async fn chat_stream(&self, request: &ChatRequest) -> AppResult<ChatStream> {
        tracing::debug!("Starting streaming request to OpenAI ({})", request.model);

        let body = self.to_openai_request(request, true);
        let url = format!("{}/v1/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(Self::request_timeout(request))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Llm(format!("Failed to send streaming request: {}", e)))?;

        let response = Self::error_for_status(response).await?;

        // The API sends server-sent events: `data: {json}` lines terminated
        // by a `data: [DONE]` marker.
        let stream = response.bytes_stream().map(|result| {
            let bytes = result.map_err(|e| AppError::Llm(format!("Stream error: {}", e)))?;
            let text = String::from_utf8_lossy(&bytes);

            let chunks: Vec<AppResult<ChatChunk>> = text
                .lines()
                .filter_map(|line| line.strip_prefix("data:").map(str::trim))
                .filter(|payload| !payload.is_empty())
                .map(|payload| {
                    if payload == "[DONE]" {
                        return Ok(ChatChunk {
                            content: String::new(),
                            done: true,
                            usage: None,
                        });
                    }

                    let parsed: OpenAiStreamChunk = serde_json::from_str(payload)
                        .map_err(|e| AppError::Llm(format!("Failed to parse chunk: {}", e)))?;

                    let (content, finished) = parsed
                        .choices
                        .into_iter()
                        .next()
                        .map(|c| {
                            (
                                c.delta.content.unwrap_or_default(),
                                c.finish_reason.is_some(),
                            )
                        })
                        .unwrap_or_default();

                    Ok(ChatChunk {
                        content,
                        done: finished,
                        usage: parsed
                            .usage
                            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens)),
                    })
                })
                .collect();

            Ok(futures::stream::iter(chunks))
        });

        Ok(Box::pin(stream.flat_map(|result| match result {
            Ok(chunks) => chunks.boxed(),
            Err(e) => futures::stream::iter(vec![Err(e)]).boxed(),
        })))
    }

    async fn embed(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        tracing::debug!(
            "Embedding {} texts with OpenAI ({})",
            texts.len(),
            self.embedding_model
        );

        let body = OpenAiEmbeddingRequest {
            model: &self.embedding_model,
            input: texts,
        };
        let url = format!("{}/v1/embeddings", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(LLM_TIMEOUT_SECS))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Llm(format!("Failed to send embedding request: {}", e)))?;

        let response = Self::error_for_status(response).await?;

        let parsed: OpenAiEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| AppError::Llm(format!("Failed to parse embedding response: {}", e)))?;

        Ok(parsed.data.into_iter().map(|item| item.embedding).collect())
    }
}
