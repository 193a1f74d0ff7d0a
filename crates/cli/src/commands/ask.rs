//! Ask command handler.
//!
//! Runs one question through the router, then scores and validates the
//! answer.

use clap::Args;
use fraudlens_agent::{
    AgentResponse, AnswerValidator, ChatTurn, QualityScorer, Router, SourceType, StreamEvent,
};
use fraudlens_core::{config::AppConfig, AppError, AppResult};
use fraudlens_data::{PassageStore, TransactionStore};
use fraudlens_llm::create_client_from_config;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

const SCORING_CONTEXT_ROWS: usize = 20;

/// Ask a question about fraud data and research
#[derive(Args, Debug)]
pub struct AskCommand {
    /// The question to ask
    pub question: Option<String>,

    /// Read the question from a file
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// JSON transcript of prior turns, for follow-up questions
    #[arg(short, long)]
    pub transcript: Option<PathBuf>,

    /// Disable streaming output
    #[arg(long)]
    pub no_stream: bool,

    /// Skip quality scoring and validation
    #[arg(long)]
    pub no_score: bool,

    /// Output the full response as JSON
    #[arg(long)]
    pub json: bool,
}

impl AskCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        config.validate()?;

        let question = self
            .get_question()?
            .ok_or_else(|| AppError::Config("No question provided".to_string()))?;
        let history = self.load_transcript()?;

        // Per-invocation dependency bundle: stores, client, router, scorer,
        // validator. No shared mutable state between invocations.
        let database = Arc::new(TransactionStore::open(&config.transactions_db_path())?);
        let passages = Arc::new(PassageStore::load(&config.passages_db_path())?);
        let llm = create_client_from_config(config)?;
        let router = Router::new(
            Arc::clone(&llm),
            database,
            passages,
            &config.model,
            config.enable_synthesis,
        );

        let response = if self.no_stream || self.json {
            let response = router.run(&question, &history).await;
            if !self.json {
                println!("{}", response.answer);
            }
            response
        } else {
            self.run_streaming(&router, &question, &history).await?
        };

        let quality = if self.no_score {
            None
        } else {
            let scorer = QualityScorer::new(Arc::clone(&llm), &config.model);
            let validator = AnswerValidator::new();
            Some(score_response(&scorer, &validator, &question, &response).await)
        };

        if self.json {
            let mut output = serde_json::to_value(&response)?;
            if let (Some((score, passed, reason)), Some(obj)) =
                (quality.as_ref(), output.as_object_mut())
            {
                obj.insert("quality_score".to_string(), serde_json::to_value(score)?);
                obj.insert("validation_passed".to_string(), serde_json::json!(passed));
                obj.insert("validation_reason".to_string(), serde_json::json!(reason));
            }
            println!("{}", serde_json::to_string_pretty(&output)?);
            return Ok(());
        }

        print_details(&response);
        if let Some((score, passed, reason)) = quality {
            println!();
            println!(
                "Quality: {:.2} (faithfulness {:.2}, relevance {:.2}, confidence {:.2})",
                score.overall, score.faithfulness, score.relevance, score.confidence
            );
            println!(
                "Grounding: {} - {}",
                if passed { "passed" } else { "failed" },
                reason
            );
        }

        Ok(())
    }

    fn get_question(&self) -> AppResult<Option<String>> {
        if let Some(ref question) = self.question {
            return Ok(Some(question.clone()));
        }
        if let Some(ref path) = self.file {
            let contents = std::fs::read_to_string(path)?;
            return Ok(Some(contents.trim().to_string()));
        }
        Ok(None)
    }

    fn load_transcript(&self) -> AppResult<Vec<ChatTurn>> {
        let Some(ref path) = self.transcript else {
            return Ok(Vec::new());
        };
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| AppError::Config(format!("Failed to parse transcript {:?}: {}", path, e)))
    }

    async fn run_streaming(
        &self,
        router: &Router,
        question: &str,
        history: &[ChatTurn],
    ) -> AppResult<AgentResponse> {
        let mut rx = router.run_stream(question.to_string(), history.to_vec());

        let mut streamed = String::new();
        let mut final_response = None;
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Delta(text) => {
                    print!("{}", text);
                    std::io::stdout().flush()?;
                    streamed.push_str(&text);
                }
                StreamEvent::Final(response) => final_response = Some(*response),
            }
        }
        println!();

        let response = final_response
            .ok_or_else(|| AppError::Agent("Stream ended without a final response".to_string()))?;

        // The final response is authoritative; fallback or synthesis may have
        // replaced the streamed text.
        if response.answer != streamed {
            println!();
            println!("{}", response.answer);
        }

        Ok(response)
    }
}

/// Assemble the scoring context from the response and run scorer + validator.
async fn score_response(
    scorer: &QualityScorer,
    validator: &AnswerValidator,
    question: &str,
    response: &AgentResponse,
) -> (fraudlens_agent::QualityScore, bool, String) {
    let mut context = String::new();
    if let Some(ref rows) = response.sql_results {
        let window = &rows[..rows.len().min(SCORING_CONTEXT_ROWS)];
        context = serde_json::to_string(window).unwrap_or_default();
    }
    if let Some(ref passages) = response.retrieved_passages {
        context.push_str(&passages.join("\n"));
    }
    if context.is_empty() {
        context = response.answer.clone();
    }

    let sql_rows = response.sql_results.as_ref().map(|r| r.len()).unwrap_or(0);
    let score = scorer
        .score(
            question,
            &response.answer,
            &context,
            response.source_type,
            response.similarity_scores.as_deref().unwrap_or(&[]),
            sql_rows > 0,
            sql_rows,
        )
        .await;

    let (passed, reason) = validator.validate(
        &response.answer,
        response.source_type,
        response.sql_results.as_deref().unwrap_or(&[]),
        response.retrieved_passages.as_deref().unwrap_or(&[]),
    );

    (score, passed, reason)
}

fn print_details(response: &AgentResponse) {
    if response.source_type == SourceType::Error {
        return;
    }

    if let Some(ref sql_query) = response.sql_query {
        println!();
        println!("SQL query:");
        println!("{}", sql_query);
        if let Some(ref rows) = response.sql_results {
            println!("({} rows)", rows.len());
        }
    }

    if let Some(ref sources) = response.sources {
        if !sources.is_empty() {
            println!();
            println!("Sources:");
            for source in sources {
                println!("- {} (p. {}, score {:.3})", source.source, source.page, source.score);
            }
        }
    }
}
