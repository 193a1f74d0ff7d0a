//! Data backends for the Fraudlens Q&A engine.
//!
//! Two prebuilt, read-only stores:
//! - `TransactionStore`: SQLite database of fraud transactions, queried via
//!   generated read statements under validation and a row cap.
//! - `PassageStore`: document passages with unit-normalized embeddings,
//!   searched by inner product.
//!
//! Both stores are built by out-of-scope ingestion tooling; this crate only
//! opens and reads them.

pub mod database;
pub mod passages;
pub mod types;

pub use database::TransactionStore;
pub use passages::PassageStore;
pub use types::{PassageMetadata, QueryResult, SearchHit};
