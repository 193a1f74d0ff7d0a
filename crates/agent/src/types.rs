//! Agent data model: tool outputs, responses, invocation log, scoring types.

use serde::{Deserialize, Serialize};

/// Which data source(s) produced an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Sql,
    Rag,
    Both,
    Error,
}

/// A column-keyed result record with PII already masked.
pub type SqlRecord = serde_json::Map<String, serde_json::Value>;

/// Output of the Text-to-SQL tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SqlToolOutput {
    pub success: bool,
    pub sql_query: String,
    pub columns: Vec<String>,
    pub rows: Vec<SqlRecord>,
    pub row_count: usize,
    pub error: Option<String>,
}

/// A cited source with display name, page, and similarity score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub source: String,
    pub page: u32,
    pub score: f32,
}

/// Output of the document retrieval tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagToolOutput {
    pub success: bool,
    pub answer: String,
    pub retrieved_passages: Vec<String>,
    pub sources: Vec<SourceRef>,
    pub similarity_scores: Vec<f32>,
    pub error: Option<String>,
}

/// Final structured response from the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub answer: String,
    pub source_type: SourceType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_results: Option<Vec<SqlRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_columns: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieved_passages: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_scores: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<SourceRef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentResponse {
    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            answer: message.clone(),
            source_type: SourceType::Error,
            sql_query: None,
            sql_results: None,
            sql_columns: None,
            retrieved_passages: None,
            similarity_scores: None,
            sources: None,
            error: Some(message),
        }
    }
}

/// A single turn of conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// Tool identifier in a routing plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Sql,
    Rag,
}

/// A single planned tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: ToolKind,
    pub question: String,
}

/// Outcome of executing one planned tool call.
#[derive(Debug, Clone)]
pub enum ToolOutcome {
    Sql(SqlToolOutput),
    Rag(RagToolOutput),
}

/// One executed tool call, in plan order.
///
/// `rendered` is the text representation handed to the composition prompt.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub question: String,
    pub outcome: ToolOutcome,
    pub rendered: String,
}

/// Reduce an ordered invocation log to the latest SQL output.
///
/// When a plan invokes the same tool more than once, the last invocation
/// wins for the structured response fields.
pub fn latest_sql(invocations: &[ToolInvocation]) -> Option<&SqlToolOutput> {
    invocations.iter().rev().find_map(|inv| match &inv.outcome {
        ToolOutcome::Sql(out) => Some(out),
        _ => None,
    })
}

/// Reduce an ordered invocation log to the latest RAG output.
pub fn latest_rag(invocations: &[ToolInvocation]) -> Option<&RagToolOutput> {
    invocations.iter().rev().find_map(|inv| match &inv.outcome {
        ToolOutcome::Rag(out) => Some(out),
        _ => None,
    })
}

/// Streaming event: provisional text deltas followed by one final response.
///
/// Deltas are provisional; the `Final` response is authoritative and may
/// differ from the concatenated deltas when fallback or synthesis replaced
/// the composed answer.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Delta(String),
    Final(Box<AgentResponse>),
}

/// Quality score for an answer. Weights: 50% faithfulness, 30% relevance,
/// 20% confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityScore {
    pub faithfulness: f32,
    pub faithfulness_reason: String,
    pub relevance: f32,
    pub confidence: f32,
    pub overall: f32,
}

/// Inputs to confidence scoring.
#[derive(Debug, Clone, Default)]
pub struct ConfidenceContext {
    pub source_type: Option<SourceType>,
    pub similarity_scores: Vec<f32>,
    pub sql_success: bool,
    pub sql_row_count: usize,
}
