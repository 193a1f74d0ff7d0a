//! Synthesize SQL and RAG results into a single unified answer.

use crate::prompts::{self, SYNTHESIS_PROMPT};
use crate::types::{RagToolOutput, SqlToolOutput};
use fraudlens_llm::{ChatMessage, ChatRequest, LlmClient};
use std::sync::Arc;

const MAX_CONTEXT_ROWS: usize = 20;
const MAX_EXCERPTS: usize = 3;
const EXCERPT_CHARS: usize = 200;

#[derive(Clone)]
pub struct Synthesizer {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl Synthesizer {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }

    /// Returns the synthesized answer, or an empty string on failure.
    ///
    /// Synthesis is an enhancement on top of an already-usable answer, so
    /// failures only log.
    pub async fn synthesize(
        &self,
        question: &str,
        sql: &SqlToolOutput,
        rag: &RagToolOutput,
    ) -> String {
        let prompt = match prompts::render(
            SYNTHESIS_PROMPT,
            &prompts::vars([
                ("question", question),
                ("sql_context", &format_sql_context(sql)),
                ("rag_context", &format_rag_context(rag)),
            ]),
        ) {
            Ok(prompt) => prompt,
            Err(e) => {
                tracing::error!("Synthesis failed: {}", e);
                return String::new();
            }
        };

        let request = ChatRequest::new(vec![ChatMessage::user(prompt)], &self.model)
            .with_temperature(0.3)
            .with_max_tokens(1000);

        match self.llm.chat(&request).await {
            Ok(response) => response.content,
            Err(e) => {
                tracing::error!("Synthesis failed: {}", e);
                String::new()
            }
        }
    }
}

fn format_sql_context(sql: &SqlToolOutput) -> String {
    if !sql.success {
        return "No SQL data available.".to_string();
    }
    let mut lines = vec![
        format!("Query: {}", sql.sql_query),
        format!("Results ({} rows):", sql.row_count),
    ];
    for row in sql.rows.iter().take(MAX_CONTEXT_ROWS) {
        let cells: Vec<String> = sql
            .columns
            .iter()
            .map(|col| {
                row.get(col)
                    .map(display_value)
                    .unwrap_or_default()
            })
            .collect();
        lines.push(cells.join(" | "));
    }
    lines.join("\n")
}

fn format_rag_context(rag: &RagToolOutput) -> String {
    if !rag.success {
        return "No document results available.".to_string();
    }
    let mut parts = vec![rag.answer.clone()];
    if !rag.retrieved_passages.is_empty() {
        parts.push("\nRelevant excerpts:".to_string());
        for passage in rag.retrieved_passages.iter().take(MAX_EXCERPTS) {
            let excerpt: String = passage.chars().take(EXCERPT_CHARS).collect();
            parts.push(format!("- {}...", excerpt));
        }
    }
    parts.join("\n")
}

fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
