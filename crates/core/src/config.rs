//! Configuration management for the Fraudlens Q&A engine.
//!
//! Configuration is layered from three sources, later ones winning:
//! 1. Built-in defaults
//! 2. A YAML config file (`fraudlens.yaml` next to the data directory)
//! 3. Environment variables and CLI flags
//!
//! Engine tuning constants that are deliberately *not* user-configurable live
//! at the bottom of this module as named constants.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{AppError, AppResult};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding the prebuilt stores (`transactions.db`, `passages.db`)
    pub data_dir: PathBuf,

    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// LLM provider (e.g., "openai", "ollama", "mock")
    pub provider: String,

    /// Completion model identifier
    pub model: String,

    /// Embedding model identifier
    pub embedding_model: String,

    /// Custom provider endpoint URL
    pub endpoint: Option<String>,

    /// API key for the LLM provider
    pub api_key: Option<String>,

    /// Merge SQL and document results into one answer when both tools ran
    pub enable_synthesis: bool,

    /// Log level override
    pub log_level: Option<String>,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,
}

/// Full configuration file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigFile {
    llm: Option<LlmSection>,
    data: Option<DataSection>,
    agent: Option<AgentSection>,
    logging: Option<LoggingSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LlmSection {
    provider: Option<String>,
    model: Option<String>,
    #[serde(rename = "embeddingModel")]
    embedding_model: Option<String>,
    endpoint: Option<String>,
    #[serde(rename = "apiKeyEnv")]
    api_key_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DataSection {
    dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AgentSection {
    #[serde(rename = "enableSynthesis")]
    enable_synthesis: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggingSection {
    level: Option<String>,
    color: Option<bool>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            config_file: None,
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            endpoint: None,
            api_key: None,
            enable_synthesis: true,
            log_level: None,
            verbose: false,
            no_color: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and defaults.
    ///
    /// Environment variables:
    /// - `FRAUDLENS_DATA_DIR`: Override data directory
    /// - `FRAUDLENS_CONFIG`: Path to config file
    /// - `FRAUDLENS_PROVIDER`: LLM provider
    /// - `FRAUDLENS_MODEL`: Completion model identifier
    /// - `FRAUDLENS_EMBEDDING_MODEL`: Embedding model identifier
    /// - `FRAUDLENS_API_KEY` / `OPENAI_API_KEY`: API key
    /// - `RUST_LOG`: Log level
    /// - `NO_COLOR`: Disable colored output
    pub fn load() -> AppResult<Self> {
        let mut config = Self::default();

        if let Ok(data_dir) = std::env::var("FRAUDLENS_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(config_file) = std::env::var("FRAUDLENS_CONFIG") {
            config.config_file = Some(PathBuf::from(config_file));
        }

        // Load from YAML config file if it exists
        let config_path = if let Some(ref cf) = config.config_file {
            cf.clone()
        } else {
            PathBuf::from("fraudlens.yaml")
        };

        if config_path.exists() {
            config = config.merge_yaml(&config_path)?;
        }

        // Environment variables override YAML config
        if let Ok(provider) = std::env::var("FRAUDLENS_PROVIDER") {
            config.provider = provider;
        }

        if let Ok(model) = std::env::var("FRAUDLENS_MODEL") {
            config.model = model;
        }

        if let Ok(embedding_model) = std::env::var("FRAUDLENS_EMBEDDING_MODEL") {
            config.embedding_model = embedding_model;
        }

        if config.api_key.is_none() {
            config.api_key = std::env::var("FRAUDLENS_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .ok();
        }

        config.log_level = std::env::var("RUST_LOG").ok().or(config.log_level);

        if std::env::var("NO_COLOR").is_ok() {
            config.no_color = true;
        }

        Ok(config)
    }

    /// Merge YAML configuration file into this config.
    fn merge_yaml(&mut self, path: &PathBuf) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config_file: ConfigFile = serde_yaml::from_str(&contents).map_err(|e| {
            AppError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })?;

        let mut result = self.clone();

        if let Some(data) = config_file.data {
            if let Some(dir) = data.dir {
                result.data_dir = PathBuf::from(dir);
            }
        }

        if let Some(logging) = config_file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
        }

        if let Some(agent) = config_file.agent {
            if let Some(enable_synthesis) = agent.enable_synthesis {
                result.enable_synthesis = enable_synthesis;
            }
        }

        if let Some(llm) = config_file.llm {
            if let Some(provider) = llm.provider {
                result.provider = provider;
            }
            if let Some(model) = llm.model {
                result.model = model;
            }
            if let Some(embedding_model) = llm.embedding_model {
                result.embedding_model = embedding_model;
            }
            if let Some(endpoint) = llm.endpoint {
                result.endpoint = Some(endpoint);
            }
            if let Some(env_var) = llm.api_key_env {
                if let Ok(key) = std::env::var(&env_var) {
                    result.api_key = Some(key);
                }
            }
        }

        Ok(result)
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// CLI flags take precedence over environment variables and config files.
    #[allow(clippy::too_many_arguments)]
    pub fn with_overrides(
        mut self,
        data_dir: Option<PathBuf>,
        config_file: Option<PathBuf>,
        provider: Option<String>,
        model: Option<String>,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
    ) -> Self {
        if let Some(data_dir) = data_dir {
            self.data_dir = data_dir;
        }

        if let Some(config_file) = config_file {
            self.config_file = Some(config_file);
        }

        if let Some(provider) = provider {
            self.provider = provider;
        }

        if let Some(model) = model {
            self.model = model;
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if verbose {
            self.verbose = true;
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        self
    }

    /// Path to the prebuilt transaction database.
    pub fn transactions_db_path(&self) -> PathBuf {
        self.data_dir.join("transactions.db")
    }

    /// Path to the prebuilt passage index.
    pub fn passages_db_path(&self) -> PathBuf {
        self.data_dir.join("passages.db")
    }

    /// Validate configuration for the active provider.
    pub fn validate(&self) -> AppResult<()> {
        let known_providers = ["openai", "ollama", "mock"];

        if !known_providers.contains(&self.provider.as_str()) {
            return Err(AppError::Config(format!(
                "Unknown provider: {}. Supported: {}",
                self.provider,
                known_providers.join(", ")
            )));
        }

        if self.provider == "openai" && self.api_key.is_none() {
            return Err(AppError::Config(
                "OpenAI provider requires an API key (FRAUDLENS_API_KEY or OPENAI_API_KEY)"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Engine tuning constants
// ---------------------------------------------------------------------------

/// Minimum accepted question length, in characters.
pub const MIN_QUESTION_LENGTH: usize = 3;

/// Maximum accepted question length, in characters.
pub const MAX_QUESTION_LENGTH: usize = 2000;

/// Retry budget for completion/embedding calls (attempts = retries + 1).
pub const MAX_API_RETRIES: u32 = 2;

/// Per-call timeout for completion/embedding requests, in seconds.
pub const LLM_TIMEOUT_SECS: u64 = 30;

/// Self-correction rounds for failed SQL executions.
pub const MAX_SQL_RETRIES: u32 = 1;

/// Row cap appended to SQL queries that carry no LIMIT clause.
pub const MAX_QUERY_ROWS: usize = 1000;

/// Busy timeout applied to the transaction store connection, in seconds.
pub const QUERY_TIMEOUT_SECS: u64 = 10;

/// Columns masked from SQL results before they leave the SQL tool.
pub const PII_COLUMNS: &[&str] = &["cc_num", "first", "last", "street"];

/// Replacement token for masked PII values.
pub const PII_MASK: &str = "***MASKED***";

/// Word-overlap ratio above which two retrieved passages count as duplicates.
pub const DEDUP_OVERLAP_THRESHOLD: f32 = 0.95;

/// Mean similarity below which a retrieval is flagged as low-confidence.
pub const LOW_SIMILARITY_THRESHOLD: f32 = 0.3;

/// Passages retrieved per question.
pub const RETRIEVAL_TOP_K: usize = 5;

/// Over-fetch multiplier applied when a corpus filter is active.
pub const FILTER_OVERFETCH_FACTOR: usize = 3;

/// Transcript turns replayed for reference resolution (user turns only).
pub const HISTORY_WINDOW: usize = 6;

/// Maximum tool invocations executed per turn.
pub const MAX_TOOL_CALLS_PER_TURN: usize = 4;

/// Sentinel marker signalling that the schema cannot answer a question.
pub const UNANSWERABLE_MARKER: &str = "UNANSWERABLE";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.provider, "openai");
        assert_eq!(config.model, "gpt-4o-mini");
        assert!(config.enable_synthesis);
        assert!(!config.verbose);
        assert!(!config.no_color);
    }

    #[test]
    fn test_store_paths() {
        let config = AppConfig::default();
        assert!(config.transactions_db_path().ends_with("transactions.db"));
        assert!(config.passages_db_path().ends_with("passages.db"));
    }

    #[test]
    fn test_with_overrides() {
        let config = AppConfig::default();
        let overridden = config.with_overrides(
            None,
            None,
            Some("ollama".to_string()),
            Some("llama3.2".to_string()),
            None,
            true,
            false,
        );

        assert_eq!(overridden.provider, "ollama");
        assert_eq!(overridden.model, "llama3.2");
        assert!(overridden.verbose);
        assert_eq!(overridden.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_validate_unknown_provider() {
        let mut config = AppConfig::default();
        config.provider = "unknown".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_openai_requires_key() {
        let mut config = AppConfig::default();
        config.provider = "openai".to_string();
        config.api_key = None;
        assert!(config.validate().is_err());

        config.api_key = Some("sk-test".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_mock() {
        let mut config = AppConfig::default();
        config.provider = "mock".to_string();
        assert!(config.validate().is_ok());
    }
}
