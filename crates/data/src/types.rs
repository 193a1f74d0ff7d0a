//! Data-layer result types.

use serde::{Deserialize, Serialize};

/// Result from a raw SQL execution in the database layer.
///
/// Rows are positional; the SQL tool converts them into column-keyed records
/// after masking.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub success: bool,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: usize,
    pub error: Option<String>,
}

impl QueryResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Metadata for a passage extracted from a source document.
///
/// Assigned at ingestion time; read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassageMetadata {
    /// Corpus key (e.g., "bhatla", "eba_ecb_2024")
    pub source: String,

    /// Page number within the source document
    pub page: u32,

    /// Chunk sequence number within the page
    pub chunk_id: u32,

    /// Optional section label
    #[serde(default)]
    pub section: String,
}

/// A single search result with text, metadata, and similarity score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub text: String,
    pub metadata: PassageMetadata,
    pub score: f32,
}
