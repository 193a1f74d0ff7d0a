//! Question router: plan tool calls, execute them, compose the answer.
//!
//! Each turn runs three phases:
//! 1. Plan: one LLM call produces a strict JSON plan naming which tools to
//!    invoke with self-contained questions, or a direct reply.
//! 2. Execute: planned calls run in order and are recorded in an invocation
//!    log. The structured response fields come from the latest invocation of
//!    each tool.
//! 3. Compose: a final LLM call writes the answer from the rendered tool
//!    results. With no planned calls, the plan's direct reply is the answer.
//!
//! An UNANSWERABLE sentinel from the SQL tool triggers an automatic
//! document-search fallback when no RAG call already ran. When both tools
//! contributed, an optional synthesis pass replaces the composed answer.

use crate::prompts::{self, strip_code_fences, COMPOSE_PROMPT, PLAN_SYSTEM_PROMPT};
use crate::rag_tool::RagTool;
use crate::sql_tool::{self, SqlTool};
use crate::synthesis::Synthesizer;
use crate::types::{
    latest_rag, latest_sql, AgentResponse, ChatTurn, RagToolOutput, SourceType, SqlToolOutput,
    StreamEvent, ToolCall, ToolInvocation, ToolKind, ToolOutcome, TurnRole,
};
use fraudlens_core::config::{
    HISTORY_WINDOW, MAX_QUESTION_LENGTH, MAX_TOOL_CALLS_PER_TURN, MIN_QUESTION_LENGTH,
};
use fraudlens_core::AppResult;
use fraudlens_data::{PassageStore, TransactionStore};
use fraudlens_llm::{ChatMessage, ChatRequest, LlmClient};
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

const MAX_RENDERED_ROWS: usize = 50;
const STREAM_CHANNEL_CAPACITY: usize = 32;

/// Parsed routing plan from the planning LLM call.
#[derive(Debug, Default, Deserialize)]
struct RoutingPlan {
    #[serde(default)]
    calls: Vec<ToolCall>,
    #[serde(default)]
    reply: String,
}

/// Dispatches questions to the SQL and RAG tools and builds responses.
#[derive(Clone)]
pub struct Router {
    llm: Arc<dyn LlmClient>,
    sql_tool: SqlTool,
    rag_tool: RagTool,
    synthesizer: Synthesizer,
    model: String,
    enable_synthesis: bool,
}

impl Router {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        database: Arc<TransactionStore>,
        passages: Arc<PassageStore>,
        model: impl Into<String>,
        enable_synthesis: bool,
    ) -> Self {
        let model = model.into();
        Self {
            sql_tool: SqlTool::new(Arc::clone(&llm), database, &model),
            rag_tool: RagTool::new(Arc::clone(&llm), passages, &model),
            synthesizer: Synthesizer::new(Arc::clone(&llm), &model),
            llm,
            model,
            enable_synthesis,
        }
    }

    /// Run one turn and return a structured response.
    pub async fn run(&self, question: &str, history: &[ChatTurn]) -> AgentResponse {
        if let Some(error) = validate_input(question) {
            return AgentResponse::error(error);
        }

        match self.run_inner(question, history, None).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Agent error: {}", e);
                error_response(&e.to_string())
            }
        }
    }

    /// Run one turn, streaming provisional text deltas.
    ///
    /// Deltas cover the composed answer as it is generated; the final event
    /// carries the authoritative response, which may differ when fallback or
    /// synthesis replaced the composed text.
    pub fn run_stream(
        &self,
        question: String,
        history: Vec<ChatTurn>,
    ) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let router = self.clone();

        tokio::spawn(async move {
            if let Some(error) = validate_input(&question) {
                let _ = tx
                    .send(StreamEvent::Final(Box::new(AgentResponse::error(error))))
                    .await;
                return;
            }

            let response = match router.run_inner(&question, &history, Some(&tx)).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!("Agent stream error: {}", e);
                    error_response(&e.to_string())
                }
            };
            let _ = tx.send(StreamEvent::Final(Box::new(response))).await;
        });

        rx
    }

    async fn run_inner(
        &self,
        question: &str,
        history: &[ChatTurn],
        delta_tx: Option<&mpsc::Sender<StreamEvent>>,
    ) -> AppResult<AgentResponse> {
        let plan = self.plan(question, history).await?;
        let invocations = self.execute(&plan).await?;

        let mut answer = if invocations.is_empty() {
            // Direct replies stream too, as a single delta
            if let Some(tx) = delta_tx {
                if !plan.reply.is_empty() {
                    let _ = tx.send(StreamEvent::Delta(plan.reply.clone())).await;
                }
            }
            plan.reply.clone()
        } else {
            self.compose(question, &invocations, delta_tx).await?
        };

        let sql = latest_sql(&invocations).cloned();
        let mut rag = latest_rag(&invocations).cloned();

        // SQL said the question is out of dataset scope; the documents may
        // still have the answer.
        if sql.as_ref().map(sql_tool::is_unanswerable).unwrap_or(false) && rag.is_none() {
            tracing::info!("SQL returned UNANSWERABLE; falling back to documents for: {}", question);
            let fallback = self.rag_tool.run(question).await;
            if fallback.success && !fallback.answer.is_empty() {
                answer = fallback.answer.clone();
            }
            rag = Some(fallback);
        }

        let source_type = infer_source_type(sql.as_ref(), rag.as_ref());

        if self.enable_synthesis && source_type == SourceType::Both {
            if let (Some(sql_out), Some(rag_out)) = (sql.as_ref(), rag.as_ref()) {
                let synthesized = self.synthesizer.synthesize(question, sql_out, rag_out).await;
                if !synthesized.is_empty() {
                    answer = synthesized;
                }
            }
        }

        Ok(build_response(answer, sql, rag))
    }

    /// Planning phase: one LLM call producing a JSON routing plan.
    ///
    /// A malformed plan degrades gracefully: the raw text becomes a direct
    /// reply with no tool calls.
    async fn plan(&self, question: &str, history: &[ChatTurn]) -> AppResult<RoutingPlan> {
        let mut messages = vec![ChatMessage::system(PLAN_SYSTEM_PROMPT)];
        for turn in recent_user_turns(history) {
            messages.push(ChatMessage::user(&turn.content));
        }
        messages.push(ChatMessage::user(question));

        let request = ChatRequest::new(messages, &self.model).with_temperature(0.0);
        let response = self.llm.chat(&request).await?;
        let raw = strip_code_fences(&response.content);

        match serde_json::from_str::<RoutingPlan>(&raw) {
            Ok(plan) => Ok(plan),
            Err(e) => {
                tracing::warn!("Malformed routing plan ({}); treating as direct reply", e);
                Ok(RoutingPlan {
                    calls: Vec::new(),
                    reply: response.content,
                })
            }
        }
    }

    /// Execution phase: run planned calls in order, capped per turn.
    async fn execute(&self, plan: &RoutingPlan) -> AppResult<Vec<ToolInvocation>> {
        if plan.calls.len() > MAX_TOOL_CALLS_PER_TURN {
            tracing::warn!(
                "Plan requested {} tool calls; truncating to {}",
                plan.calls.len(),
                MAX_TOOL_CALLS_PER_TURN
            );
        }

        let mut invocations = Vec::new();
        for call in plan.calls.iter().take(MAX_TOOL_CALLS_PER_TURN) {
            let invocation = match call.tool {
                ToolKind::Sql => {
                    tracing::info!("SQL tool called with: {}", call.question);
                    let output = self.sql_tool.run(&call.question).await?;
                    let rendered = render_sql_result(&output);
                    ToolInvocation {
                        question: call.question.clone(),
                        outcome: ToolOutcome::Sql(output),
                        rendered,
                    }
                }
                ToolKind::Rag => {
                    tracing::info!("RAG tool called with: {}", call.question);
                    let output = self.rag_tool.run(&call.question).await;
                    let rendered = render_rag_result(&output);
                    ToolInvocation {
                        question: call.question.clone(),
                        outcome: ToolOutcome::Rag(output),
                        rendered,
                    }
                }
            };
            invocations.push(invocation);
        }
        Ok(invocations)
    }

    /// Composition phase: write the final answer from rendered tool results.
    async fn compose(
        &self,
        question: &str,
        invocations: &[ToolInvocation],
        delta_tx: Option<&mpsc::Sender<StreamEvent>>,
    ) -> AppResult<String> {
        let tool_results = invocations
            .iter()
            .map(|inv| {
                let tool = match inv.outcome {
                    ToolOutcome::Sql(_) => "sql",
                    ToolOutcome::Rag(_) => "rag",
                };
                format!("--- {} ({}) ---\n{}", tool, inv.question, inv.rendered)
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let prompt = prompts::render(
            COMPOSE_PROMPT,
            &prompts::vars([("question", question), ("tool_results", &tool_results)]),
        )?;
        let request = ChatRequest::new(vec![ChatMessage::user(prompt)], &self.model);

        match delta_tx {
            Some(tx) => {
                let mut stream = self.llm.chat_stream(&request.with_streaming()).await?;
                let mut full_text = String::new();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk?;
                    if !chunk.content.is_empty() {
                        full_text.push_str(&chunk.content);
                        let _ = tx.send(StreamEvent::Delta(chunk.content)).await;
                    }
                }
                Ok(full_text)
            }
            None => {
                let response = self.llm.chat(&request).await?;
                Ok(response.content)
            }
        }
    }
}

fn validate_input(question: &str) -> Option<String> {
    let q = question.trim();
    if q.is_empty() {
        return Some("Please enter a question.".to_string());
    }
    if q.chars().count() < MIN_QUESTION_LENGTH {
        return Some(format!(
            "Question is too short (minimum {} characters).",
            MIN_QUESTION_LENGTH
        ));
    }
    if q.chars().count() > MAX_QUESTION_LENGTH {
        return Some(format!(
            "Question is too long (maximum {} characters).",
            MAX_QUESTION_LENGTH
        ));
    }
    None
}

/// User turns from the trailing history window.
fn recent_user_turns(history: &[ChatTurn]) -> impl Iterator<Item = &ChatTurn> {
    let start = history.len().saturating_sub(HISTORY_WINDOW);
    history[start..]
        .iter()
        .filter(|turn| turn.role == TurnRole::User)
}

fn infer_source_type(sql: Option<&SqlToolOutput>, rag: Option<&RagToolOutput>) -> SourceType {
    match (sql.is_some(), rag.is_some()) {
        (true, true) => SourceType::Both,
        (true, false) => SourceType::Sql,
        _ => SourceType::Rag,
    }
}

fn build_response(
    answer: String,
    sql: Option<SqlToolOutput>,
    rag: Option<RagToolOutput>,
) -> AgentResponse {
    let source_type = infer_source_type(sql.as_ref(), rag.as_ref());
    let sql = sql.filter(|s| s.success);
    let rag = rag.filter(|r| r.success);
    AgentResponse {
        answer,
        source_type,
        sql_query: sql.as_ref().map(|s| s.sql_query.clone()),
        sql_results: sql.as_ref().map(|s| s.rows.clone()),
        sql_columns: sql.as_ref().map(|s| s.columns.clone()),
        retrieved_passages: rag.as_ref().map(|r| r.retrieved_passages.clone()),
        similarity_scores: rag.as_ref().map(|r| r.similarity_scores.clone()),
        sources: rag.map(|r| r.sources),
        error: None,
    }
}

fn error_response(message: &str) -> AgentResponse {
    let mut response = AgentResponse::error(format!(
        "I encountered an error processing your question: {}",
        message
    ));
    response.error = Some(message.to_string());
    response
}

/// Render a SQL output as text for the composition prompt.
fn render_sql_result(output: &SqlToolOutput) -> String {
    if !output.success {
        return format!(
            "SQL query failed: {}",
            output.error.as_deref().unwrap_or("unknown error")
        );
    }
    if output.rows.is_empty() {
        return "Query executed successfully but returned no results.".to_string();
    }

    let mut lines = vec![
        format!("SQL Query: {}", output.sql_query),
        String::new(),
        format!("Results ({} rows):", output.row_count),
        output.columns.join(" | "),
        "-".repeat(60),
    ];
    for row in output.rows.iter().take(MAX_RENDERED_ROWS) {
        let cells: Vec<String> = output
            .columns
            .iter()
            .map(|col| match row.get(col) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(serde_json::Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            })
            .collect();
        lines.push(cells.join(" | "));
    }
    if output.row_count > MAX_RENDERED_ROWS {
        lines.push(format!(
            "... and {} more rows",
            output.row_count - MAX_RENDERED_ROWS
        ));
    }
    lines.join("\n")
}

/// Render a RAG output as text for the composition prompt.
fn render_rag_result(output: &RagToolOutput) -> String {
    if !output.success {
        return format!(
            "Document search failed: {}",
            output.error.as_deref().unwrap_or("unknown error")
        );
    }
    output.answer.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fraudlens_data::passages::Passage;
    use fraudlens_data::PassageMetadata;
    use fraudlens_llm::MockClient;

    fn seeded_database() -> Arc<TransactionStore> {
        let store = TransactionStore::open_in_memory().unwrap();
        {
            let conn = store.connection();
            conn.execute_batch(
                r#"
                CREATE TABLE transactions (
                    trans_date_trans_time TEXT, merchant TEXT, category TEXT,
                    amt REAL, is_fraud INTEGER, transaction_month TEXT
                );
                INSERT INTO transactions VALUES
                    ('2019-01-01 10:00:00', 'fraud_Acme', 'grocery_pos', 42.50, 0, '2019-01'),
                    ('2019-02-15 23:30:00', 'fraud_Binc', 'shopping_net', 310.00, 1, '2019-02');
                "#,
            )
            .unwrap();
        }
        Arc::new(store)
    }

    fn seeded_passages() -> Arc<PassageStore> {
        let mock = MockClient::new();
        let texts = [
            "skimming copies card data at point of sale terminals",
            "SCA requirements reduced fraud across the EEA in 2023",
        ];
        let passages = texts
            .iter()
            .enumerate()
            .map(|(i, text)| Passage {
                text: text.to_string(),
                metadata: PassageMetadata {
                    source: "bhatla".to_string(),
                    page: i as u32 + 1,
                    chunk_id: i as u32,
                    section: String::new(),
                },
                embedding: futures::executor::block_on(mock.embed(&[text.to_string()]))
                    .unwrap()
                    .remove(0),
            })
            .collect();
        Arc::new(PassageStore::from_passages(passages))
    }

    fn router_with(replies: Vec<&str>, enable_synthesis: bool) -> Router {
        let llm = Arc::new(MockClient::with_replies(replies));
        Router::new(
            llm,
            seeded_database(),
            seeded_passages(),
            "mock-model",
            enable_synthesis,
        )
    }

    #[tokio::test]
    async fn test_validation_short_question() {
        let router = router_with(vec![], false);
        let response = router.run("hi", &[]).await;
        assert_eq!(response.source_type, SourceType::Error);
        assert!(response.answer.contains("too short"));
    }

    #[tokio::test]
    async fn test_validation_empty_question() {
        let router = router_with(vec![], false);
        let response = router.run("   ", &[]).await;
        assert_eq!(response.source_type, SourceType::Error);
        assert_eq!(response.answer, "Please enter a question.");
    }

    #[tokio::test]
    async fn test_direct_reply_skips_tools() {
        let router = router_with(
            vec![r#"{"calls": [], "reply": "I'm sorry, I can only help with fraud questions."}"#],
            false,
        );
        let response = router.run("what's the weather?", &[]).await;
        assert!(response.answer.contains("I'm sorry"));
        assert!(response.sql_query.is_none());
        assert!(response.retrieved_passages.is_none());
    }

    #[tokio::test]
    async fn test_malformed_plan_becomes_direct_reply() {
        let router = router_with(vec!["Sorry, I can only discuss fraud topics."], false);
        let response = router.run("tell me a joke", &[]).await;
        assert_eq!(response.answer, "Sorry, I can only discuss fraud topics.");
    }

    #[tokio::test]
    async fn test_sql_route() {
        let router = router_with(
            vec![
                r#"{"calls": [{"tool": "sql", "question": "how many transactions are there?"}], "reply": ""}"#,
                "SELECT COUNT(*) AS cnt FROM transactions",
                "There are 2 transactions in the dataset.",
            ],
            false,
        );
        let response = router.run("how many transactions are there?", &[]).await;
        assert_eq!(response.source_type, SourceType::Sql);
        assert_eq!(response.answer, "There are 2 transactions in the dataset.");
        assert_eq!(
            response.sql_query.as_deref(),
            Some("SELECT COUNT(*) AS cnt FROM transactions")
        );
        assert_eq!(response.sql_results.as_ref().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rag_route() {
        let router = router_with(
            vec![
                r#"{"calls": [{"tool": "rag", "question": "what is skimming?"}], "reply": ""}"#,
                "Skimming copies card data (Understanding Credit Card Frauds, p. 1).",
                "Skimming is the copying of card data at terminals.",
            ],
            false,
        );
        let response = router.run("what is skimming?", &[]).await;
        assert_eq!(response.source_type, SourceType::Rag);
        assert!(response.answer.contains("Skimming"));
        assert!(response.retrieved_passages.is_some());
        assert!(response.sources.is_some());
    }

    #[tokio::test]
    async fn test_unanswerable_falls_back_to_documents() {
        // Reply order: plan, SQL generation, compose, RAG fallback generation
        let router = router_with(
            vec![
                r#"{"calls": [{"tool": "sql", "question": "fraud in 2023?"}], "reply": ""}"#,
                "SELECT 'UNANSWERABLE: dataset covers 2019-2020 only' AS message",
                "The dataset does not cover 2023.",
                "According to the documents, fraud fell in 2023 (p. 2).",
            ],
            false,
        );
        let response = router.run("what happened with fraud in 2023?", &[]).await;
        // Both outputs are present after the fallback
        assert_eq!(response.source_type, SourceType::Both);
        assert!(response.answer.contains("fraud fell in 2023"));
        assert!(response
            .sql_query
            .as_deref()
            .unwrap()
            .contains("UNANSWERABLE"));
        assert!(response.retrieved_passages.is_some());
    }

    #[tokio::test]
    async fn test_both_tools_with_synthesis() {
        let router = router_with(
            vec![
                r#"{"calls": [{"tool": "sql", "question": "monthly fraud rate"}, {"tool": "rag", "question": "fraud rate research"}], "reply": ""}"#,
                "SELECT transaction_month, COUNT(*) AS cnt FROM transactions GROUP BY transaction_month ORDER BY transaction_month",
                "Research shows fraud rates vary (p. 1).",
                "Composed answer from both tools.",
                "## Direct Answer\nSynthesized from data and research.",
            ],
            true,
        );
        let response = router.run("compare fraud rates with research", &[]).await;
        assert_eq!(response.source_type, SourceType::Both);
        assert!(response.answer.contains("Synthesized"));
        assert!(response.sql_query.is_some());
        assert!(response.retrieved_passages.is_some());
    }

    #[tokio::test]
    async fn test_synthesis_disabled_keeps_composed_answer() {
        let router = router_with(
            vec![
                r#"{"calls": [{"tool": "sql", "question": "q"}, {"tool": "rag", "question": "q"}], "reply": ""}"#,
                "SELECT COUNT(*) AS cnt FROM transactions",
                "Document answer.",
                "Composed answer from both tools.",
            ],
            false,
        );
        let response = router.run("compare fraud rates with research", &[]).await;
        assert_eq!(response.source_type, SourceType::Both);
        assert_eq!(response.answer, "Composed answer from both tools.");
    }

    #[tokio::test]
    async fn test_run_stream_deltas_then_final() {
        let router = router_with(
            vec![
                r#"{"calls": [{"tool": "sql", "question": "count"}], "reply": ""}"#,
                "SELECT COUNT(*) AS cnt FROM transactions",
                "Streaming answer text.",
            ],
            false,
        );
        let mut rx = router.run_stream("how many transactions?".to_string(), Vec::new());

        let mut deltas = String::new();
        let mut final_response = None;
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Delta(text) => deltas.push_str(&text),
                StreamEvent::Final(response) => final_response = Some(response),
            }
        }

        let final_response = final_response.expect("stream must end with a final response");
        assert_eq!(deltas, "Streaming answer text.");
        assert_eq!(final_response.answer, "Streaming answer text.");
        assert_eq!(final_response.source_type, SourceType::Sql);
    }

    #[tokio::test]
    async fn test_run_stream_direct_reply_emits_delta() {
        let router = router_with(
            vec![r#"{"calls": [], "reply": "I can only help with fraud questions."}"#],
            false,
        );
        let mut rx = router.run_stream("what's the weather?".to_string(), Vec::new());

        let mut deltas = String::new();
        let mut final_response = None;
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Delta(text) => deltas.push_str(&text),
                StreamEvent::Final(response) => final_response = Some(response),
            }
        }

        let final_response = final_response.expect("stream must end with a final response");
        assert_eq!(deltas, "I can only help with fraud questions.");
        assert_eq!(final_response.answer, deltas);
    }

    #[tokio::test]
    async fn test_tool_call_cap() {
        // Plan asks for 6 calls; only the first 4 run. Replies: plan, then
        // 4 SQL generations, then compose.
        let plan = r#"{"calls": [
            {"tool": "sql", "question": "a"}, {"tool": "sql", "question": "b"},
            {"tool": "sql", "question": "c"}, {"tool": "sql", "question": "d"},
            {"tool": "sql", "question": "e"}, {"tool": "sql", "question": "f"}
        ], "reply": ""}"#;
        let router = router_with(
            vec![
                plan,
                "SELECT 1 AS a",
                "SELECT 2 AS b",
                "SELECT 3 AS c",
                "SELECT 4 AS d",
                "composed",
            ],
            false,
        );
        let response = router.run("many questions at once", &[]).await;
        assert_eq!(response.answer, "composed");
        // Last SQL invocation wins
        assert_eq!(response.sql_query.as_deref(), Some("SELECT 4 AS d"));
    }

    #[test]
    fn test_recent_user_turns_window() {
        let history: Vec<ChatTurn> = (0..10)
            .map(|i| ChatTurn {
                role: if i % 2 == 0 { TurnRole::User } else { TurnRole::Assistant },
                content: format!("turn {}", i),
            })
            .collect();
        let turns: Vec<_> = recent_user_turns(&history).map(|t| t.content.clone()).collect();
        // Last 6 turns are 4..10; user turns among them are 4, 6, 8
        assert_eq!(turns, vec!["turn 4", "turn 6", "turn 8"]);
    }
}
