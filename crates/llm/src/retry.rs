//! Bounded exponential-backoff retry for completion/embedding calls.
//!
//! Every call the engine makes to a hosted model goes through `RetryPolicy`:
//! a fixed number of attempts with a doubling delay between them, raising the
//! last error once the budget is exhausted.

use crate::client::{ChatRequest, ChatResponse, ChatStream, LlmClient};
use fraudlens_core::config::MAX_API_RETRIES;
use fraudlens_core::{AppError, AppResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Retry policy with exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt (attempts = max_retries + 1)
    pub max_retries: u32,

    /// Delay before the first retry; doubles on each subsequent retry
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_API_RETRIES,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Run an operation under this policy, retrying on any error.
    pub async fn run<T, F, Fut>(&self, operation: &str, f: F) -> AppResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut last_error: Option<AppError> = None;

        for attempt in 0..=self.max_retries {
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt < self.max_retries {
                        let wait = self.base_delay * 2u32.pow(attempt);
                        tracing::warn!(
                            "{} failed (attempt {}), retrying in {:?}: {}",
                            operation,
                            attempt + 1,
                            wait,
                            err
                        );
                        tokio::time::sleep(wait).await;
                    } else {
                        tracing::error!(
                            "{} failed after {} attempts: {}",
                            operation,
                            self.max_retries + 1,
                            err
                        );
                    }
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AppError::Llm(format!("{} failed", operation))))
    }
}

/// An `LlmClient` decorator that applies a `RetryPolicy` to every call.
///
/// For streams, only the initiation of the stream is retried; once chunks are
/// flowing, errors propagate to the consumer.
pub struct RetryingClient {
    inner: Arc<dyn LlmClient>,
    policy: RetryPolicy,
}

impl RetryingClient {
    pub fn new(inner: Arc<dyn LlmClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn with_default_policy(inner: Arc<dyn LlmClient>) -> Self {
        Self::new(inner, RetryPolicy::default())
    }
}

#[async_trait::async_trait]
impl LlmClient for RetryingClient {
    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }

    async fn chat(&self, request: &ChatRequest) -> AppResult<ChatResponse> {
        self.policy
            .run("chat completion", || self.inner.chat(request))
            .await
    }

    async fn chat_stream(&self, request: &ChatRequest) -> AppResult<ChatStream> {
        self.policy
            .run("chat stream", || self.inner.chat_stream(request))
            .await
    }

    async fn embed(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        self.policy.run("embedding", || self.inner.embed(texts)).await
    }
}
