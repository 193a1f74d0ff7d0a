//! Passage index for retrieval over the fraud document corpus.
//!
//! Passages and their embeddings are precomputed by out-of-scope ingestion
//! tooling and stored in SQLite. Search is a brute-force inner product over
//! unit-normalized vectors, which is exact cosine similarity at this corpus
//! size.

use crate::types::{PassageMetadata, SearchHit};
use fraudlens_core::config::FILTER_OVERFETCH_FACTOR;
use fraudlens_core::{AppError, AppResult};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;

/// A stored passage with its embedding.
#[derive(Debug, Clone)]
pub struct Passage {
    pub text: String,
    pub metadata: PassageMetadata,
    pub embedding: Vec<f32>,
}

/// In-memory passage index loaded from the prebuilt passages database.
pub struct PassageStore {
    passages: Vec<Passage>,
}

impl PassageStore {
    /// Load all passages and embeddings from the prebuilt database.
    pub fn load(db_path: &Path) -> AppResult<Self> {
        if !db_path.exists() {
            return Err(AppError::Data(format!(
                "Passage database not found: {:?}. Run the ingestion tooling first.",
                db_path
            )));
        }

        let conn = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| AppError::Data(format!("Failed to open passage store: {}", e)))?;

        let mut stmt = conn
            .prepare("SELECT source, page, chunk_id, section, text, embedding FROM passages")
            .map_err(|e| AppError::Data(format!("Failed to read passages: {}", e)))?;

        let rows = stmt
            .query_map([], |row| {
                let blob: Vec<u8> = row.get(5)?;
                Ok(Passage {
                    metadata: PassageMetadata {
                        source: row.get(0)?,
                        page: row.get(1)?,
                        chunk_id: row.get(2)?,
                        section: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    },
                    text: row.get(4)?,
                    embedding: bytes_to_embedding(&blob),
                })
            })
            .map_err(|e| AppError::Data(format!("Failed to read passages: {}", e)))?;

        let mut passages = Vec::new();
        for row in rows {
            let mut passage =
                row.map_err(|e| AppError::Data(format!("Failed to read passage row: {}", e)))?;
            normalize(&mut passage.embedding);
            passages.push(passage);
        }

        tracing::info!(count = passages.len(), "Loaded passage index");
        Ok(Self { passages })
    }

    /// Build a store directly from passages (tests and fixtures).
    pub fn from_passages(mut passages: Vec<Passage>) -> Self {
        for passage in &mut passages {
            normalize(&mut passage.embedding);
        }
        Self { passages }
    }

    /// Search the index by cosine similarity against a query embedding.
    ///
    /// When a source filter is given, over-fetches candidates before
    /// filtering so a dominant other-source cluster cannot starve the result.
    pub fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        source_filter: Option<&str>,
    ) -> Vec<SearchHit> {
        let mut query = query_embedding.to_vec();
        normalize(&mut query);

        let fetch_k = match source_filter {
            Some(_) => top_k * FILTER_OVERFETCH_FACTOR,
            None => top_k,
        };

        let mut scored: Vec<(f32, &Passage)> = self
            .passages
            .iter()
            .map(|p| (dot(&query, &p.embedding), p))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(fetch_k);

        if let Some(source) = source_filter {
            scored.retain(|(_, p)| p.metadata.source == source);
            scored.truncate(top_k);
        }

        scored
            .into_iter()
            .map(|(score, p)| SearchHit {
                text: p.text.clone(),
                metadata: p.metadata.clone(),
                score,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// Passage counts per source, for the stats command.
    pub fn stats(&self) -> Vec<(String, usize)> {
        let mut counts: std::collections::BTreeMap<String, usize> = Default::default();
        for passage in &self.passages {
            *counts.entry(passage.metadata.source.clone()).or_default() += 1;
        }
        counts.into_iter().collect()
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Decode a little-endian f32 embedding blob.
fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Encode an embedding as a little-endian f32 blob.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}
