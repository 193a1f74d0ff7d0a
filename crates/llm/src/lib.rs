//! LLM integration crate for the Fraudlens Q&A engine.
//!
//! This crate provides a provider-agnostic abstraction for chat completions
//! and text embeddings. It supports multiple providers through a unified
//! trait-based interface, plus a bounded exponential-backoff retry wrapper
//! that all callers go through.
//!
//! # Providers
//! - **OpenAI**: hosted chat completion + embedding API (default)
//! - **Ollama**: local LLM runtime
//! - **Mock**: deterministic scripted client for tests and offline runs
//!
//! # Example
//! ```no_run
//! use fraudlens_llm::{ChatMessage, ChatRequest, LlmClient, providers::OllamaClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = OllamaClient::new();
//! let request = ChatRequest::new(vec![ChatMessage::user("Hello!")], "llama3.2");
//! let response = client.chat(&request).await?;
//! println!("{}", response.content);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod factory;
pub mod providers;
pub mod retry;

// Re-export main types
pub use client::{
    ChatChunk, ChatMessage, ChatRequest, ChatResponse, ChatRole, ChatStream, LlmClient, TokenUsage,
};
pub use factory::{create_client, create_client_from_config};
pub use providers::{MockClient, OllamaClient, OpenAiClient};
pub use retry::{RetryPolicy, RetryingClient};
