//! LLM provider factory.
//!
//! Creates a provider client from application configuration and wraps it in
//! the retry policy every caller is expected to go through.

use crate::client::LlmClient;
use crate::providers::{MockClient, OllamaClient, OpenAiClient};
use crate::retry::RetryingClient;
use fraudlens_core::{AppConfig, AppError, AppResult};
use std::sync::Arc;

/// Create a retry-wrapped LLM client based on the provider name.
///
/// # Arguments
/// * `provider` - Provider identifier ("openai", "ollama", "mock")
/// * `endpoint` - Optional custom endpoint URL
/// * `embedding_model` - Embedding model identifier
/// * `api_key` - Optional API key (required for "openai")
///
/// # Errors
/// Returns `AppError::Config` if the provider is unknown or a required
/// API key is missing.
pub fn create_client(
    provider: &str,
    endpoint: Option<&str>,
    embedding_model: &str,
    api_key: Option<&str>,
) -> AppResult<Arc<dyn LlmClient>> {
    let inner: Arc<dyn LlmClient> = match provider.to_lowercase().as_str() {
        "openai" => {
            let api_key = api_key.ok_or_else(|| {
                AppError::Config("OpenAI provider requires an API key".to_string())
            })?;
            match endpoint {
                Some(url) => Arc::new(OpenAiClient::with_base_url(url, api_key, embedding_model)),
                None => Arc::new(OpenAiClient::new(api_key, embedding_model)),
            }
        }
        "ollama" => {
            let base_url = endpoint.unwrap_or("http://localhost:11434");
            Arc::new(OllamaClient::with_base_url(base_url).with_embedding_model(embedding_model))
        }
        "mock" => Arc::new(MockClient::new()),
        other => {
            return Err(AppError::Config(format!("Unknown provider: {}", other)));
        }
    };

    Ok(Arc::new(RetryingClient::with_default_policy(inner)))
}

/// Convenience constructor from an `AppConfig`.
pub fn create_client_from_config(config: &AppConfig) -> AppResult<Arc<dyn LlmClient>> {
    create_client(
        &config.provider,
        config.endpoint.as_deref(),
        &config.embedding_model,
        config.api_key.as_deref(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_openai_client() {
        let client = create_client("openai", None, "text-embedding-3-small", Some("sk-test"));
        assert!(client.is_ok());
        assert_eq!(client.unwrap().provider_name(), "openai");
    }

    #[test]
    fn test_openai_requires_api_key() {
        match create_client("openai", None, "text-embedding-3-small", None) {
            Err(err) => assert!(err.to_string().contains("requires an API key")),
            Ok(_) => panic!("Expected error for OpenAI without API key"),
        }
    }

    #[test]
    fn test_create_ollama_with_custom_endpoint() {
        let client = create_client("ollama", Some("http://localhost:8080"), "nomic-embed-text", None);
        assert!(client.is_ok());
        assert_eq!(client.unwrap().provider_name(), "ollama");
    }

    #[test]
    fn test_create_mock_client() {
        let client = create_client("mock", None, "trigram-v1", None);
        assert!(client.is_ok());
        assert_eq!(client.unwrap().provider_name(), "mock");
    }

    #[test]
    fn test_unknown_provider() {
        match create_client("unknown", None, "x", None) {
            Err(err) => assert!(err.to_string().contains("Unknown provider")),
            Ok(_) => panic!("Expected error for unknown provider"),
        }
    }
}
