//! Text-to-SQL tool: generate SQL from questions, execute, mask PII.

use crate::prompts::{
    self, format_sql_few_shot, strip_code_fences, SQL_ERROR_CORRECTION_PROMPT, SQL_SYSTEM_PROMPT,
};
use crate::types::{SqlRecord, SqlToolOutput};
use fraudlens_core::config::{MAX_SQL_RETRIES, PII_COLUMNS, PII_MASK, UNANSWERABLE_MARKER};
use fraudlens_core::AppResult;
use fraudlens_data::TransactionStore;
use fraudlens_llm::{ChatMessage, ChatRequest, LlmClient};
use std::sync::Arc;

/// Text-to-SQL pipeline over the transaction store.
#[derive(Clone)]
pub struct SqlTool {
    llm: Arc<dyn LlmClient>,
    db: Arc<TransactionStore>,
    model: String,
}

impl SqlTool {
    pub fn new(llm: Arc<dyn LlmClient>, db: Arc<TransactionStore>, model: impl Into<String>) -> Self {
        Self {
            llm,
            db,
            model: model.into(),
        }
    }

    /// Run the full pipeline: generate, execute, self-correct once on
    /// failure, mask PII.
    pub async fn run(&self, question: &str) -> AppResult<SqlToolOutput> {
        let system_prompt = self.build_prompt()?;
        let mut sql = self.generate_sql(&system_prompt, question, None).await?;
        tracing::info!("Generated SQL:\n{}", sql);

        let mut result = self.db.execute_query(&sql);

        if !result.success && MAX_SQL_RETRIES > 0 {
            tracing::info!("SQL failed, attempting self-correction...");
            let error_prompt = prompts::render(
                SQL_ERROR_CORRECTION_PROMPT,
                &prompts::vars([
                    ("error", result.error.as_deref().unwrap_or("unknown error")),
                    ("failed_sql", &sql),
                ]),
            )?;
            sql = self
                .generate_sql(&system_prompt, question, Some(&error_prompt))
                .await?;
            tracing::info!("Corrected SQL:\n{}", sql);
            result = self.db.execute_query(&sql);
        }

        if result.success {
            let rows = mask_pii(&result.columns, &result.rows);
            Ok(SqlToolOutput {
                success: true,
                sql_query: sql,
                columns: result.columns,
                rows,
                row_count: result.row_count,
                error: None,
            })
        } else {
            Ok(SqlToolOutput {
                success: false,
                sql_query: sql,
                error: result.error,
                ..Default::default()
            })
        }
    }

    /// Build the SQL system prompt with schema, samples, stats, and few-shot.
    fn build_prompt(&self) -> AppResult<String> {
        let schema = self.db.schema();
        let sample = self.db.sample_rows(3)?;
        let rendered = prompts::render(
            SQL_SYSTEM_PROMPT,
            &prompts::vars([("schema", schema), ("sample_rows", &sample)]),
        )?;
        let stats = self.db.column_stats();
        let few_shot = format_sql_few_shot();
        Ok(format!("{}\n{}\n{}", rendered, stats, few_shot))
    }

    async fn generate_sql(
        &self,
        system_prompt: &str,
        question: &str,
        error_context: Option<&str>,
    ) -> AppResult<String> {
        let user_content = error_context.unwrap_or(question);
        let request = ChatRequest::new(
            vec![
                ChatMessage::system(system_prompt),
                ChatMessage::user(user_content),
            ],
            &self.model,
        )
        .with_temperature(0.0);

        let response = self.llm.chat(&request).await?;
        Ok(strip_code_fences(&response.content))
    }
}

/// Convert positional rows into column-keyed records with PII masked.
fn mask_pii(columns: &[String], rows: &[Vec<serde_json::Value>]) -> Vec<SqlRecord> {
    rows.iter()
        .map(|row| {
            columns
                .iter()
                .zip(row.iter())
                .map(|(col, val)| {
                    let value = if PII_COLUMNS.contains(&col.to_lowercase().as_str()) {
                        serde_json::Value::String(PII_MASK.to_string())
                    } else {
                        val.clone()
                    };
                    (col.clone(), value)
                })
                .collect()
        })
        .collect()
}

/// True if a successful SQL output is the UNANSWERABLE sentinel.
pub fn is_unanswerable(output: &SqlToolOutput) -> bool {
    if !output.success || output.rows.len() != 1 {
        return false;
    }
    output.rows[0].values().any(|v| {
        v.as_str()
            .map(|s| s.to_uppercase().contains(UNANSWERABLE_MARKER))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fraudlens_llm::MockClient;

    fn seeded_store() -> Arc<TransactionStore> {
        let store = TransactionStore::open_in_memory().unwrap();
        {
            let conn = store.connection();
            conn.execute_batch(
                r#"
                CREATE TABLE transactions (
                    trans_date_trans_time TEXT, cc_num INTEGER, merchant TEXT,
                    category TEXT, amt REAL, first TEXT, last TEXT, street TEXT,
                    is_fraud INTEGER, transaction_month TEXT, transaction_hour INTEGER
                );
                INSERT INTO transactions VALUES
                    ('2019-01-01 10:00:00', 1111, 'fraud_Acme', 'grocery_pos', 42.50,
                     'Alice', 'Smith', '1 Main St', 0, '2019-01', 10),
                    ('2019-02-15 23:30:00', 2222, 'fraud_Binc', 'shopping_net', 310.00,
                     'Bob', 'Jones', '2 Oak Ave', 1, '2019-02', 23);
                "#,
            )
            .unwrap();
        }
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_run_masks_pii() {
        let llm = Arc::new(MockClient::with_replies(vec![
            "SELECT first, last, amt FROM transactions ORDER BY amt".to_string(),
        ]));
        let tool = SqlTool::new(llm, seeded_store(), "mock-model");

        let output = tool.run("who spent what?").await.unwrap();
        assert!(output.success);
        assert_eq!(output.row_count, 2);
        assert_eq!(output.rows[0]["first"], serde_json::json!("***MASKED***"));
        assert_eq!(output.rows[0]["last"], serde_json::json!("***MASKED***"));
        assert_eq!(output.rows[0]["amt"], serde_json::json!(42.5));
    }

    #[tokio::test]
    async fn test_run_strips_code_fences() {
        let llm = Arc::new(MockClient::with_replies(vec![
            "```sql\nSELECT COUNT(*) AS cnt FROM transactions\n```".to_string(),
        ]));
        let tool = SqlTool::new(llm, seeded_store(), "mock-model");

        let output = tool.run("how many transactions?").await.unwrap();
        assert!(output.success);
        assert_eq!(output.sql_query, "SELECT COUNT(*) AS cnt FROM transactions");
        assert_eq!(output.rows[0]["cnt"], serde_json::json!(2));
    }

    #[tokio::test]
    async fn test_self_correction_single_retry() {
        // First reply fails (bad column), second succeeds
        let llm = Arc::new(MockClient::with_replies(vec![
            "SELECT no_such_column FROM transactions".to_string(),
            "SELECT COUNT(*) AS cnt FROM transactions".to_string(),
        ]));
        let tool = SqlTool::new(llm, seeded_store(), "mock-model");

        let output = tool.run("how many?").await.unwrap();
        assert!(output.success);
        assert_eq!(output.sql_query, "SELECT COUNT(*) AS cnt FROM transactions");
    }

    #[tokio::test]
    async fn test_self_correction_exhausted() {
        let llm = Arc::new(MockClient::with_replies(vec![
            "SELECT no_such_column FROM transactions".to_string(),
            "SELECT still_wrong FROM transactions".to_string(),
        ]));
        let tool = SqlTool::new(llm, seeded_store(), "mock-model");

        let output = tool.run("how many?").await.unwrap();
        assert!(!output.success);
        assert!(output.error.is_some());
    }

    #[test]
    fn test_is_unanswerable() {
        let mut output = SqlToolOutput {
            success: true,
            row_count: 1,
            ..Default::default()
        };
        let mut record = SqlRecord::new();
        record.insert(
            "message".to_string(),
            serde_json::json!("UNANSWERABLE: no such column"),
        );
        output.rows = vec![record];
        assert!(is_unanswerable(&output));
    }

    #[test]
    fn test_is_unanswerable_regular_result() {
        let mut output = SqlToolOutput {
            success: true,
            row_count: 1,
            ..Default::default()
        };
        let mut record = SqlRecord::new();
        record.insert("cnt".to_string(), serde_json::json!(42));
        output.rows = vec![record];
        assert!(!is_unanswerable(&output));
    }

    #[test]
    fn test_is_unanswerable_multi_row() {
        let mut output = SqlToolOutput {
            success: true,
            row_count: 2,
            ..Default::default()
        };
        let mut record = SqlRecord::new();
        record.insert("m".to_string(), serde_json::json!("UNANSWERABLE: x"));
        output.rows = vec![record.clone(), record];
        assert!(!is_unanswerable(&output));
    }
}
