//! Fraudlens Core Library
//!
//! This crate provides the foundational utilities for the Fraudlens Q&A engine:
//! - Error handling (`AppError`, `AppResult`)
//! - Logging infrastructure
//! - Configuration management and tuning constants

pub mod config;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{AppError, AppResult};
