//! Fraudlens CLI
//!
//! Command-line interface for the fraud analysis Q&A engine: ask questions
//! against the transaction database and research documents, or inspect the
//! prebuilt stores.

mod commands;

use clap::{Parser, Subcommand};
use commands::{AskCommand, StatsCommand};
use fraudlens_core::{config::AppConfig, logging};
use std::path::PathBuf;

/// Fraudlens CLI - fraud analysis Q&A over transactions and research documents
#[derive(Parser, Debug)]
#[command(name = "fraudlens")]
#[command(about = "Fraud analysis Q&A over transactions and research documents", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory holding the prebuilt stores (default: ./data)
    #[arg(short, long, global = true, env = "FRAUDLENS_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Path to config file
    #[arg(short, long, global = true, env = "FRAUDLENS_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,

    /// LLM provider (openai, ollama, mock)
    #[arg(short, long, global = true, env = "FRAUDLENS_PROVIDER")]
    provider: Option<String>,

    /// Model identifier
    #[arg(short, long, global = true, env = "FRAUDLENS_MODEL")]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ask a question about fraud data and research
    Ask(AskCommand),

    /// Show statistics about the prebuilt stores
    Stats(StatsCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load()?;
    let config = config.with_overrides(
        cli.data_dir,
        cli.config,
        cli.provider,
        cli.model,
        cli.log_level,
        cli.verbose,
        cli.no_color,
    );

    logging::init_logging(config.log_level.as_deref(), config.no_color)?;

    tracing::info!("Fraudlens CLI starting");
    tracing::debug!("Data dir: {:?}", config.data_dir);
    tracing::debug!("Provider: {}", config.provider);
    tracing::debug!("Model: {}", config.model);

    let command_name = match &cli.command {
        Commands::Ask(_) => "ask",
        Commands::Stats(_) => "stats",
    };
    let _span = tracing::info_span!("command", name = command_name).entered();

    let result = match cli.command {
        Commands::Ask(cmd) => cmd.execute(&config).await,
        Commands::Stats(cmd) => cmd.execute(&config).await,
    };

    match &result {
        Ok(_) => tracing::info!("Command completed successfully"),
        Err(e) => tracing::error!("Command failed: {}", e),
    }

    Ok(result?)
}
