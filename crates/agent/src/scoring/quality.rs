//! Overall quality scoring for responses.
//!
//! Weights: 50% faithfulness, 30% relevance, 20% confidence.

use crate::prompts::{self, strip_code_fences, FAITHFULNESS_PROMPT};
use crate::scoring::confidence::compute_confidence;
use crate::types::{ConfidenceContext, QualityScore, SourceType};
use fraudlens_llm::{ChatMessage, ChatRequest, LlmClient};
use serde::Deserialize;
use std::sync::Arc;

const FAITHFULNESS_WEIGHT: f32 = 0.5;
const RELEVANCE_WEIGHT: f32 = 0.3;
const CONFIDENCE_WEIGHT: f32 = 0.2;

#[derive(Debug, Deserialize)]
struct JudgeVerdict {
    score: f32,
    #[serde(default = "default_reason")]
    reason: String,
}

fn default_reason() -> String {
    "No reason provided".to_string()
}

pub struct QualityScorer {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl QualityScorer {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }

    /// Score a response. Scoring never fails: component failures degrade to
    /// neutral values.
    #[allow(clippy::too_many_arguments)]
    pub async fn score(
        &self,
        question: &str,
        answer: &str,
        context: &str,
        source_type: SourceType,
        similarity_scores: &[f32],
        sql_success: bool,
        sql_row_count: usize,
    ) -> QualityScore {
        let (faithfulness, faithfulness_reason) =
            self.score_faithfulness(question, answer, context).await;
        let relevance = self.score_relevance(question, answer).await;

        let confidence = compute_confidence(&ConfidenceContext {
            source_type: Some(source_type),
            similarity_scores: similarity_scores.to_vec(),
            sql_success,
            sql_row_count,
        });

        let overall = FAITHFULNESS_WEIGHT * faithfulness
            + RELEVANCE_WEIGHT * relevance
            + CONFIDENCE_WEIGHT * confidence;

        QualityScore {
            faithfulness: round4(faithfulness),
            faithfulness_reason,
            relevance: round4(relevance),
            confidence: round4(confidence),
            overall: round4(overall),
        }
    }

    /// LLM-as-judge faithfulness scoring. Returns (score, reason).
    async fn score_faithfulness(
        &self,
        question: &str,
        answer: &str,
        context: &str,
    ) -> (f32, String) {
        let prompt = match prompts::render(
            FAITHFULNESS_PROMPT,
            &prompts::vars([("context", context), ("question", question), ("answer", answer)]),
        ) {
            Ok(prompt) => prompt,
            Err(e) => {
                tracing::warn!("Failed to build faithfulness prompt: {}", e);
                return (0.5, "Could not evaluate faithfulness".to_string());
            }
        };

        let request = ChatRequest::new(vec![ChatMessage::user(prompt)], &self.model)
            .with_max_tokens(200);

        let raw = match self.llm.chat(&request).await {
            Ok(response) => strip_code_fences(&response.content),
            Err(e) => {
                tracing::warn!("Faithfulness judge call failed: {}", e);
                return (0.5, "Could not evaluate faithfulness".to_string());
            }
        };

        match serde_json::from_str::<JudgeVerdict>(&raw) {
            Ok(verdict) => (verdict.score.clamp(0.0, 1.0), verdict.reason),
            Err(e) => {
                tracing::warn!("Failed to parse faithfulness score: {}", e);
                (0.5, "Could not evaluate faithfulness".to_string())
            }
        }
    }

    /// Cosine similarity between question and answer embeddings.
    async fn score_relevance(&self, question: &str, answer: &str) -> f32 {
        let texts = vec![question.to_string(), answer.to_string()];
        match self.llm.embed(&texts).await {
            Ok(vecs) if vecs.len() == 2 => cosine_similarity(&vecs[0], &vecs[1]),
            Ok(_) => 0.5,
            Err(e) => {
                tracing::warn!("Relevance scoring failed: {}", e);
                0.5
            }
        }
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm = norm_a * norm_b;
    if norm == 0.0 {
        return 0.0;
    }
    (dot / norm).clamp(0.0, 1.0)
}

fn round4(value: f32) -> f32 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use fraudlens_llm::MockClient;

    #[tokio::test]
    async fn test_score_with_valid_judge_verdict() {
        let llm = Arc::new(MockClient::with_replies(vec![
            r#"{"score": 0.9, "reason": "All claims supported"}"#,
        ]));
        let scorer = QualityScorer::new(llm, "mock-model");

        let score = scorer
            .score(
                "what is the fraud rate?",
                "the fraud rate is 0.58%",
                "fraud_rate_pct: 0.58",
                SourceType::Sql,
                &[],
                true,
                1,
            )
            .await;

        assert!((score.faithfulness - 0.9).abs() < 1e-6);
        assert_eq!(score.faithfulness_reason, "All claims supported");
        assert_eq!(score.confidence, 1.0);
        // overall = 0.5 * 0.9 + 0.3 * relevance + 0.2 * 1.0
        let expected = round4(0.5 * 0.9 + 0.3 * score.relevance + 0.2);
        assert!((score.overall - expected).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_malformed_judge_output_neutral() {
        let llm = Arc::new(MockClient::with_replies(vec!["not json at all"]));
        let scorer = QualityScorer::new(llm, "mock-model");

        let score = scorer
            .score("q", "a", "context", SourceType::Rag, &[0.8], false, 0)
            .await;

        assert_eq!(score.faithfulness, 0.5);
        assert_eq!(score.faithfulness_reason, "Could not evaluate faithfulness");
    }

    #[tokio::test]
    async fn test_judge_score_clamped() {
        let llm = Arc::new(MockClient::with_replies(vec![
            r#"{"score": 1.7, "reason": "overshoot"}"#,
        ]));
        let scorer = QualityScorer::new(llm, "mock-model");

        let score = scorer
            .score("q", "a", "c", SourceType::Rag, &[], false, 0)
            .await;
        assert_eq!(score.faithfulness, 1.0);
    }

    #[tokio::test]
    async fn test_judge_output_in_code_fences() {
        let llm = Arc::new(MockClient::with_replies(vec![
            "```json\n{\"score\": 0.6, \"reason\": \"fenced\"}\n```",
        ]));
        let scorer = QualityScorer::new(llm, "mock-model");

        let score = scorer
            .score("q", "a", "c", SourceType::Rag, &[], false, 0)
            .await;
        assert!((score.faithfulness - 0.6).abs() < 1e-6);
        assert_eq!(score.faithfulness_reason, "fenced");
    }

    #[tokio::test]
    async fn test_relevance_identical_texts() {
        let llm = Arc::new(MockClient::with_replies(vec![
            r#"{"score": 1.0, "reason": "ok"}"#,
        ]));
        let scorer = QualityScorer::new(llm, "mock-model");

        let score = scorer
            .score(
                "credit card fraud detection",
                "credit card fraud detection",
                "c",
                SourceType::Rag,
                &[],
                false,
                0,
            )
            .await;
        assert!((score.relevance - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_cosine_zero_norm() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_round4() {
        assert_eq!(round4(0.123_456), 0.1235);
        assert_eq!(round4(1.0), 1.0);
    }
}
