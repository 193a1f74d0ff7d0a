//! Mock provider with scripted chat replies and trigram-based embeddings.
//!
//! Chat completions pop replies from a scripted queue, which makes multi-step
//! orchestration flows testable without a live model. Embeddings are
//! deterministic and content-aware: character trigrams and word frequencies
//! hashed into a fixed-dimension unit vector. Not semantically accurate, but
//! consistent, which is what tests and offline runs need.

use crate::client::{ChatChunk, ChatRequest, ChatResponse, ChatStream, LlmClient, TokenUsage};
use fraudlens_core::AppResult;
use std::collections::VecDeque;
use std::sync::Mutex;

const DEFAULT_DIMENSIONS: usize = 384;

/// Deterministic mock client for tests and offline runs.
pub struct MockClient {
    replies: Mutex<VecDeque<String>>,
    dimensions: usize,
}

impl MockClient {
    /// Create a mock client with no scripted replies.
    ///
    /// Chat calls return a fixed placeholder once the script is exhausted.
    pub fn new() -> Self {
        Self::with_replies(Vec::<String>::new())
    }

    /// Create a mock client with a scripted reply queue.
    pub fn with_replies(replies: Vec<impl Into<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            dimensions: DEFAULT_DIMENSIONS,
        }
    }

    /// Set the embedding dimensionality.
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }

    fn next_reply(&self) -> String {
        self.replies
            .lock()
            .expect("mock reply queue poisoned")
            .pop_front()
            .unwrap_or_else(|| "mock response".to_string())
    }

    /// Hash content words and their character trigrams into a unit vector.
    fn generate_mock_embedding(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0; self.dimensions];

        let lower = text.to_lowercase();

        // Stop words carry no signal here
        let stop_words: std::collections::HashSet<&str> = [
            "the", "is", "at", "which", "on", "a", "an", "as", "are", "was", "were", "for", "to",
            "of", "in", "and", "or", "but", "with", "by", "from", "this", "that", "be", "have",
            "has", "had", "it", "its", "their", "they", "them",
        ]
        .iter()
        .copied()
        .collect();

        let words: Vec<&str> = lower
            .split_whitespace()
            .filter(|w| !stop_words.contains(w) && w.len() > 2)
            .collect();

        let mut word_freq = std::collections::HashMap::new();
        for word in &words {
            *word_freq.entry(*word).or_insert(0) += 1;
        }

        for (word, freq) in word_freq.iter() {
            // Trigrams spread each word across several dimensions, so texts
            // sharing word fragments land near each other
            let chars: Vec<char> = word.chars().collect();
            for i in 0..chars.len().saturating_sub(2) {
                let trigram = format!(
                    "{}{}{}",
                    chars[i],
                    chars[i + 1],
                    chars.get(i + 2).unwrap_or(&' ')
                );
                let trigram_hash = trigram
                    .bytes()
                    .fold(0u64, |acc, b| acc.wrapping_mul(37).wrapping_add(b as u64));

                let dim_idx = (trigram_hash as usize) % self.dimensions;
                embedding[dim_idx] += (*freq as f32).sqrt();
            }

            // One dimension per whole word, weighted by frequency
            let word_hash = word
                .bytes()
                .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
            let base_dim = (word_hash as usize) % self.dimensions;
            embedding[base_dim] += *freq as f32;
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut embedding {
                *v /= norm;
            }
        }

        embedding
    }
}

impl Default for MockClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LlmClient for MockClient {
    fn provider_name(&self) -> &str {
        "mock"
    }

    async fn chat(&self, request: &ChatRequest) -> AppResult<ChatResponse> {
        Ok(ChatResponse {
            content: self.next_reply(),
            model: request.model.clone(),
            usage: TokenUsage::default(),
        })
    }

    async fn chat_stream(&self, _request: &ChatRequest) -> AppResult<ChatStream> {
        let reply = self.next_reply();

        // Split the scripted reply into word-sized deltas, then a final chunk.
        let mut chunks: Vec<AppResult<ChatChunk>> = reply
            .split_inclusive(' ')
            .map(|piece| {
                Ok(ChatChunk {
                    content: piece.to_string(),
                    done: false,
                    usage: None,
                })
            })
            .collect();
        chunks.push(Ok(ChatChunk {
            content: String::new(),
            done: true,
            usage: Some(TokenUsage::default()),
        }));

        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn embed(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| self.generate_mock_embedding(text))
            .collect())
    }
}
