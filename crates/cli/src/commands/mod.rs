//! Command handlers for the Fraudlens CLI.

pub mod ask;
pub mod stats;

pub use ask::AskCommand;
pub use stats::StatsCommand;
