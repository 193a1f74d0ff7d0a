//! Ollama LLM provider implementation.
//!
//! This module provides integration with Ollama, a local LLM runtime.
//! Ollama API: https://github.com/ollama/ollama/blob/main/docs/api.md

use crate::client::{
    ChatChunk, ChatMessage, ChatRequest, ChatResponse, ChatStream, LlmClient, TokenUsage,
};
use fraudlens_core::config::LLM_TIMEOUT_SECS;
use fraudlens_core::{AppError, AppResult};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";

/// Ollama chat API request format.
#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

/// Ollama chat API response format.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    model: String,
    message: OllamaMessage,
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

/// Ollama embeddings API request format.
#[derive(Debug, Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Ollama LLM client.
pub struct OllamaClient {
    /// Base URL for Ollama API
    base_url: String,

    /// Model used for embedding requests
    embedding_model: String,

    /// HTTP client
    client: reqwest::Client,
}

impl OllamaClient {
    /// Create a new Ollama client with default settings.
    ///
    /// Default URL: http://localhost:11434
    pub fn new() -> Self {
        Self::with_base_url("http://localhost:11434")
    }

    /// Create a new Ollama client with a custom base URL.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Set the embedding model.
    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    fn to_ollama_request<'a>(&self, request: &'a ChatRequest, stream: bool) -> OllamaChatRequest<'a> {
        let options = if request.temperature.is_some() || request.max_tokens.is_some() {
            Some(OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            })
        } else {
            None
        };

        OllamaChatRequest {
            model: &request.model,
            messages: &request.messages,
            options,
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
            "Ollama API error ({}): {}",
            status, error_text
        )))
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LlmClient for OllamaClient {
    fn provider_name(&self) -> &str {
        "ollama"
    }

    async fn chat(&self, request: &ChatRequest) -> AppResult<ChatResponse> {
        tracing::debug!("Sending completion request to Ollama ({})", request.model);

        let body = self.to_ollama_request(request, false);
        let url = format!("{}/api/chat", self.base_url);

        let response = self
            .client
            .post(&url)
            .timeout(Self::request_timeout(request))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Llm(format!("Failed to send request to Ollama: {}", e)))?;

        let response = Self::error_for_status(response).await?;

        let parsed: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::Llm(format!("Failed to parse Ollama response: {}", e)))?;

        Ok(ChatResponse {
            content: parsed.message.content.trim().to_string(),
            model: parsed.model,
            usage: TokenUsage::new(
                parsed.prompt_eval_count.unwrap_or(0),
                parsed.eval_count.unwrap_or(0),
            ),
        })
    }

    async fn chat_stream(&self, request: &ChatRequest) -> AppResult<ChatStream> {
        tracing::debug!("Starting streaming request to Ollama ({})", request.model);

        let body = self.to_ollama_request(request, true);
        let url = format!("{}/api/chat", self.base_url);

        let response = self
            .client
            .post(&url)
            .timeout(Self::request_timeout(request))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Llm(format!("Failed to send streaming request: {}", e)))?;

        let response = Self::error_for_status(response).await?;

        // Ollama sends newline-delimited JSON chunks
        let stream = response.bytes_stream().map(|result| {
            let bytes = result.map_err(|e| AppError::Llm(format!("Stream error: {}", e)))?;
            let text = String::from_utf8_lossy(&bytes);

            let chunks: Vec<AppResult<ChatChunk>> = text
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(|line| {
                    let parsed: OllamaChatResponse = serde_json::from_str(line)
                        .map_err(|e| AppError::Llm(format!("Failed to parse chunk: {}", e)))?;

                    Ok(ChatChunk {
                        content: parsed.message.content,
                        done: parsed.done,
                        usage: if parsed.done {
                            Some(TokenUsage::new(
                                parsed.prompt_eval_count.unwrap_or(0),
                                parsed.eval_count.unwrap_or(0),
                            ))
                        } else {
                            None
                        },
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
            "Embedding {} texts with Ollama ({})",
            texts.len(),
            self.embedding_model
        );

        let body = OllamaEmbedRequest {
            model: &self.embedding_model,
            input: texts,
        };
        let url = format!("{}/api/embed", self.base_url);

        let response = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(LLM_TIMEOUT_SECS))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Llm(format!("Failed to send embedding request: {}", e)))?;

        let response = Self::error_for_status(response).await?;

        let parsed: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(|e| AppError::Llm(format!("Failed to parse embedding response: {}", e)))?;

        Ok(parsed.embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_client_creation() {
        let client = OllamaClient::new();
        assert_eq!(client.provider_name(), "ollama");
        assert_eq!(client.base_url, "http://localhost:11434");
        assert_eq!(client.embedding_model, DEFAULT_EMBEDDING_MODEL);
    }

    #[test]
    fn test_ollama_request_conversion() {
        let client = OllamaClient::new();
        let request = ChatRequest::new(vec![ChatMessage::user("Hello")], "llama3.2")
            .with_temperature(0.7)
            .with_max_tokens(100);

        let ollama_req = client.to_ollama_request(&request, false);
        assert_eq!(ollama_req.model, "llama3.2");
        let options = ollama_req.options.unwrap();
        assert_eq!(options.temperature, Some(0.7));
        assert_eq!(options.num_predict, Some(100));
    }

    #[test]
    fn test_options_omitted_when_unset() {
        let client = OllamaClient::new();
        let request = ChatRequest::new(vec![ChatMessage::user("Hello")], "llama3.2");
        let ollama_req = client.to_ollama_request(&request, true);
        assert!(ollama_req.options.is_none());
        assert!(ollama_req.stream);
    }
}
