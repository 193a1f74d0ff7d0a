//! Query routing and multi-source answer orchestration.
//!
//! This crate holds the core engine: a router that plans tool calls against a
//! transaction database and a document passage index, executes them, composes
//! a final answer, and annotates it with quality scores and a grounding
//! verdict.

pub mod prompts;
pub mod rag_tool;
pub mod router;
pub mod scoring;
pub mod sql_tool;
pub mod synthesis;
pub mod types;

pub use rag_tool::RagTool;
pub use router::Router;
pub use scoring::{AnswerValidator, QualityScorer};
pub use sql_tool::SqlTool;
pub use synthesis::Synthesizer;
pub use types::{
    AgentResponse, ChatTurn, ConfidenceContext, QualityScore, RagToolOutput, SourceType,
    SqlToolOutput, StreamEvent, ToolCall, ToolInvocation, ToolKind, TurnRole,
};
