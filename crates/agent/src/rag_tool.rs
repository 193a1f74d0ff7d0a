//! Document retrieval tool: retrieve relevant passages and generate cited
//! answers.

use crate::prompts::{self, RAG_GENERATION_PROMPT};
use crate::types::{RagToolOutput, SourceRef};
use fraudlens_core::config::{
    DEDUP_OVERLAP_THRESHOLD, LOW_SIMILARITY_THRESHOLD, RETRIEVAL_TOP_K,
};
use fraudlens_core::AppResult;
use fraudlens_data::{PassageStore, SearchHit};
use fraudlens_llm::{ChatMessage, ChatRequest, LlmClient};
use std::collections::HashSet;
use std::sync::Arc;

/// Corpus keys mapped to human-readable display names for citations.
const SOURCE_DISPLAY_NAMES: &[(&str, &str)] = &[
    ("bhatla", "Understanding Credit Card Frauds (Bhatla et al.)"),
    ("eba_ecb_2024", "2024 Report on Payment Fraud (EBA/ECB)"),
];

/// Question keywords that pin retrieval to a single corpus.
const SOURCE_KEYWORDS: &[(&str, &[&str])] = &[
    ("bhatla", &["bhatla", "bhatla paper", "understanding credit card"]),
    (
        "eba_ecb_2024",
        &[
            "eba",
            "ecb",
            "eea",
            "sca",
            "psd2",
            "cross-border",
            "h1 2023",
            "h2 2022",
            "2024 report",
            "payment fraud report",
        ],
    ),
];

fn display_name(source: &str) -> String {
    SOURCE_DISPLAY_NAMES
        .iter()
        .find(|(key, _)| *key == source)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| source.to_string())
}

/// Retrieval-and-generation pipeline over the passage store.
#[derive(Clone)]
pub struct RagTool {
    llm: Arc<dyn LlmClient>,
    store: Arc<PassageStore>,
    model: String,
}

impl RagTool {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        store: Arc<PassageStore>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            store,
            model: model.into(),
        }
    }

    /// Run the pipeline. Internal failures are folded into the output so the
    /// router can fall back to whatever else it has.
    pub async fn run(&self, question: &str) -> RagToolOutput {
        match self.run_inner(question).await {
            Ok(output) => output,
            Err(e) => {
                tracing::error!("RAG tool error: {}", e);
                RagToolOutput {
                    success: false,
                    error: Some(e.to_string()),
                    ..Default::default()
                }
            }
        }
    }

    async fn run_inner(&self, question: &str) -> AppResult<RagToolOutput> {
        let source_filter = detect_source_filter(question);
        if let Some(source) = source_filter {
            tracing::info!("Detected source filter: {}", source);
        }

        let embeddings = self.llm.embed(&[question.to_string()]).await?;
        let query_embedding = embeddings.first().cloned().unwrap_or_default();

        let hits = self
            .store
            .search(&query_embedding, RETRIEVAL_TOP_K, source_filter);

        if hits.is_empty() {
            return Ok(RagToolOutput {
                success: true,
                answer: "I couldn't find relevant information in the available documents \
                         to answer this question."
                    .to_string(),
                ..Default::default()
            });
        }

        let hits = deduplicate(hits);

        let avg_score: f32 = hits.iter().map(|h| h.score).sum::<f32>() / hits.len() as f32;
        if avg_score < LOW_SIMILARITY_THRESHOLD {
            tracing::warn!("Low average similarity score: {:.3}", avg_score);
        }

        let context = format_context(&hits);
        let answer = self.generate_answer(question, &context).await?;

        Ok(RagToolOutput {
            success: true,
            answer,
            retrieved_passages: hits.iter().map(|h| h.text.clone()).collect(),
            sources: hits
                .iter()
                .map(|h| SourceRef {
                    source: display_name(&h.metadata.source),
                    page: h.metadata.page,
                    score: (h.score * 10_000.0).round() / 10_000.0,
                })
                .collect(),
            similarity_scores: hits.iter().map(|h| h.score).collect(),
            error: None,
        })
    }

    async fn generate_answer(&self, question: &str, context: &str) -> AppResult<String> {
        let prompt = prompts::render(
            RAG_GENERATION_PROMPT,
            &prompts::vars([("context", context), ("question", question)]),
        )?;
        let request = ChatRequest::new(vec![ChatMessage::user(prompt)], &self.model)
            .with_temperature(0.1)
            .with_max_tokens(1000);
        let response = self.llm.chat(&request).await?;
        Ok(response.content)
    }
}

/// Detect which corpus to filter by based on question keywords.
fn detect_source_filter(question: &str) -> Option<&'static str> {
    let q_lower = question.to_lowercase();
    SOURCE_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| q_lower.contains(kw)))
        .map(|(source, _)| *source)
}

/// Remove near-duplicate passages based on word overlap.
///
/// Overlap is measured against the smaller word set; earlier (higher-ranked)
/// passages win.
fn deduplicate(hits: Vec<SearchHit>) -> Vec<SearchHit> {
    if hits.len() <= 1 {
        return hits;
    }

    let mut unique: Vec<SearchHit> = Vec::with_capacity(hits.len());
    for hit in hits {
        let words: HashSet<String> = hit.text.to_lowercase().split_whitespace().map(String::from).collect();
        let is_dup = unique.iter().any(|kept| {
            let kept_words: HashSet<String> = kept
                .text
                .to_lowercase()
                .split_whitespace()
                .map(String::from)
                .collect();
            if words.is_empty() || kept_words.is_empty() {
                return false;
            }
            let overlap = words.intersection(&kept_words).count() as f32;
            overlap / words.len().min(kept_words.len()) as f32 > DEDUP_OVERLAP_THRESHOLD
        });
        if !is_dup {
            unique.push(hit);
        }
    }
    unique
}

/// Format search hits as numbered context for the generation prompt.
fn format_context(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No relevant context found.".to_string();
    }

    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            format!(
                "[{}] [Source: {}, Page {}] (relevance: {:.3})\n{}",
                i + 1,
                display_name(&hit.metadata.source),
                hit.metadata.page,
                hit.score,
                hit.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
