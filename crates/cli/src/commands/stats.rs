//! Stats command handler.

use clap::Args;
use fraudlens_core::{config::AppConfig, AppResult};
use fraudlens_data::{PassageStore, TransactionStore};

/// Show statistics about the prebuilt stores
#[derive(Args, Debug)]
pub struct StatsCommand {}

impl StatsCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let database = TransactionStore::open(&config.transactions_db_path())?;
        let (total, frauds) = database.stats()?;
        let rate = if total > 0 {
            100.0 * frauds as f64 / total as f64
        } else {
            0.0
        };

        println!("Transaction store: {:?}", config.transactions_db_path());
        println!("- Transactions: {}", total);
        println!("- Fraudulent: {} ({:.2}%)", frauds, rate);

        let passages = PassageStore::load(&config.passages_db_path())?;
        println!();
        println!("Passage index: {:?}", config.passages_db_path());
        println!("- Passages: {}", passages.len());
        for (source, count) in passages.stats() {
            println!("- {}: {} passages", source, count);
        }

        Ok(())
    }
}
