//! SQLite-backed store of fraud transaction data.
//!
//! The store exposes a fixed logical schema over a `transactions` table built
//! by out-of-scope ingestion tooling. Query execution is restricted to single
//! read statements, screened against a keyword blocklist, and capped at
//! `MAX_QUERY_ROWS` rows.

use fraudlens_core::config::{MAX_QUERY_ROWS, QUERY_TIMEOUT_SECS};
use fraudlens_core::{AppError, AppResult};
use regex::Regex;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::{LazyLock, Mutex, MutexGuard};
use std::time::Duration;

static BLOCKED_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(INSERT|UPDATE|DELETE|DROP|ALTER|CREATE|TRUNCATE|EXEC|EXECUTE|GRANT|REVOKE|ATTACH|PRAGMA)\b",
    )
    .unwrap()
});

static LIMIT_CLAUSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bLIMIT\b").unwrap());

/// Formatted table schema string for LLM prompts.
const SCHEMA_DESCRIPTION: &str = r#"Table: transactions
Columns:
- trans_date_trans_time (TEXT, ISO timestamp): Date and time of the transaction
- cc_num (INTEGER): Credit card number
- merchant (TEXT): Merchant name (prefixed with "fraud_")
- category (TEXT): Transaction category (e.g., grocery_pos, shopping_net, misc_net, etc.)
- amt (REAL): Transaction amount in USD
- first (TEXT): Cardholder first name
- last (TEXT): Cardholder last name
- gender (TEXT): Cardholder gender (M or F)
- street (TEXT): Cardholder street address
- city (TEXT): Cardholder city
- state (TEXT): Cardholder US state code
- zip (INTEGER): Cardholder ZIP code
- lat (REAL): Cardholder latitude
- long (REAL): Cardholder longitude
- city_pop (INTEGER): Population of cardholder's city
- job (TEXT): Cardholder occupation
- dob (TEXT): Cardholder date of birth
- trans_num (TEXT): Unique transaction identifier
- unix_time (INTEGER): Unix timestamp of the transaction
- merch_lat (REAL): Merchant latitude
- merch_long (REAL): Merchant longitude
- is_fraud (INTEGER): Fraud label (0 = legitimate, 1 = fraudulent)
- transaction_month (TEXT): Pre-computed 'YYYY-MM' month string
- transaction_hour (INTEGER): Pre-computed hour of day (0-23)

Date range: 2019-01-01 to 2020-12-31
Total rows: ~1,852,394
Fraud rate: ~0.6%
SQL dialect: SQLite (use strftime for date formatting, FILTER clause for conditional aggregation)"#;

/// SQLite-backed database of fraud transaction data.
pub struct TransactionStore {
    conn: Mutex<Connection>,
}

impl TransactionStore {
    /// Open the prebuilt transaction database read-only.
    pub fn open(db_path: &Path) -> AppResult<Self> {
        if !db_path.exists() {
            return Err(AppError::Data(format!(
                "Transaction database not found: {:?}. Run the ingestion tooling first.",
                db_path
            )));
        }

        let conn = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| AppError::Data(format!("Failed to open transaction store: {}", e)))?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (fixtures and tests).
    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Data(format!("Failed to open in-memory store: {}", e)))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> AppResult<Self> {
        conn.busy_timeout(Duration::from_secs(QUERY_TIMEOUT_SECS))
            .map_err(|e| AppError::Data(format!("Failed to set busy timeout: {}", e)))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Direct access to the underlying connection (stats and fixtures).
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("transaction store lock poisoned")
    }

    /// Return a formatted table schema string for LLM prompts.
    pub fn schema(&self) -> &'static str {
        SCHEMA_DESCRIPTION
    }

    /// Return formatted sample rows for LLM prompts.
    pub fn sample_rows(&self, n: usize) -> AppResult<String> {
        let conn = self.connection();
        let mut stmt = conn
            .prepare(&format!("SELECT * FROM transactions LIMIT {}", n))
            .map_err(|e| AppError::Data(format!("Failed to read sample rows: {}", e)))?;

        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut lines = vec![columns.join(" | ")];

        let mut rows = stmt
            .query([])
            .map_err(|e| AppError::Data(format!("Failed to read sample rows: {}", e)))?;
        while let Some(row) = rows
            .next()
            .map_err(|e| AppError::Data(format!("Failed to read sample rows: {}", e)))?
        {
            let cells: Vec<String> = (0..columns.len())
                .map(|i| {
                    row.get_ref(i)
                        .map(|v| value_ref_to_display(&v))
                        .unwrap_or_default()
                })
                .collect();
            lines.push(cells.join(" | "));
        }

        Ok(lines.join("\n"))
    }

    /// Fetch column statistics for prompt context.
    ///
    /// Best-effort: any failure degrades to an empty string with a warning.
    pub fn column_stats(&self) -> String {
        match self.column_stats_inner() {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!("Could not get column stats: {}", e);
                String::new()
            }
        }
    }

    fn column_stats_inner(&self) -> AppResult<String> {
        let conn = self.connection();
        let mut lines = vec!["\n**Column statistics**:".to_string()];

        let (min_date, max_date): (String, String) = conn
            .query_row(
                "SELECT MIN(substr(trans_date_trans_time, 1, 10)), \
                        MAX(substr(trans_date_trans_time, 1, 10)) FROM transactions",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| AppError::Data(e.to_string()))?;
        lines.push(format!("- Date range: {} to {}", min_date, max_date));

        let total: i64 = conn
            .query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))
            .map_err(|e| AppError::Data(e.to_string()))?;
        let frauds: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM transactions WHERE is_fraud = 1",
                [],
                |row| row.get(0),
            )
            .map_err(|e| AppError::Data(e.to_string()))?;
        lines.push(format!("- Total transactions: {}", total));
        lines.push(format!(
            "- Fraudulent: {} ({:.2}%)",
            frauds,
            if total > 0 {
                100.0 * frauds as f64 / total as f64
            } else {
                0.0
            }
        ));

        let mut stmt = conn
            .prepare("SELECT DISTINCT category FROM transactions ORDER BY category")
            .map_err(|e| AppError::Data(e.to_string()))?;
        let categories: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| AppError::Data(e.to_string()))?
            .filter_map(|r| r.ok())
            .collect();
        lines.push(format!(
            "- Categories ({}): {}",
            categories.len(),
            categories.join(", ")
        ));

        let (min_amt, max_amt, avg_amt): (f64, f64, f64) = conn
            .query_row(
                "SELECT ROUND(MIN(amt), 2), ROUND(MAX(amt), 2), ROUND(AVG(amt), 2) FROM transactions",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(|e| AppError::Data(e.to_string()))?;
        lines.push(format!(
            "- Amount range: ${} - ${} (avg: ${})",
            min_amt, max_amt, avg_amt
        ));

        let (min_month, max_month): (String, String) = conn
            .query_row(
                "SELECT MIN(transaction_month), MAX(transaction_month) FROM transactions",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| AppError::Data(e.to_string()))?;
        lines.push(format!(
            "- transaction_month range: '{}' to '{}' (TEXT, YYYY-MM format)",
            min_month, max_month
        ));

        Ok(lines.join("\n"))
    }

    /// Returns error message if the query is invalid, None if OK.
    ///
    /// A valid query is a single SELECT statement with no mutating keywords.
    pub fn validate_query(sql: &str) -> Option<String> {
        let stripped = sql.trim().trim_end_matches(';').trim();
        if !stripped.to_uppercase().starts_with("SELECT") {
            return Some("Only SELECT queries are allowed.".to_string());
        }
        if BLOCKED_KEYWORDS.is_match(stripped) {
            return Some("Query contains blocked keywords.".to_string());
        }
        None
    }

    /// Execute a validated SQL query. Returns a typed `QueryResult`.
    ///
    /// Rejected queries are never executed. Queries without a LIMIT clause
    /// are capped at `MAX_QUERY_ROWS`.
    pub fn execute_query(&self, sql: &str) -> crate::types::QueryResult {
        if let Some(error) = Self::validate_query(sql) {
            return crate::types::QueryResult::failure(error);
        }

        let mut sql = sql.trim().trim_end_matches(';').to_string();
        if !LIMIT_CLAUSE.is_match(&sql) {
            sql = format!("{} LIMIT {}", sql, MAX_QUERY_ROWS);
        }

        match self.run_query(&sql) {
            Ok((columns, rows)) => crate::types::QueryResult {
                success: true,
                row_count: rows.len(),
                columns,
                rows,
                error: None,
            },
            Err(e) => {
                tracing::warn!("SQL execution failed: {}", e);
                crate::types::QueryResult::failure(e.to_string())
            }
        }
    }

    fn run_query(&self, sql: &str) -> AppResult<(Vec<String>, Vec<Vec<serde_json::Value>>)> {
        let conn = self.connection();
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| AppError::Data(e.to_string()))?;

        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let column_count = columns.len();

        let mut rows_out = Vec::new();
        let mut rows = stmt.query([]).map_err(|e| AppError::Data(e.to_string()))?;
        while let Some(row) = rows.next().map_err(|e| AppError::Data(e.to_string()))? {
            let mut cells = Vec::with_capacity(column_count);
            for i in 0..column_count {
                let value = row
                    .get_ref(i)
                    .map(|v| value_ref_to_json(&v))
                    .unwrap_or(serde_json::Value::Null);
                cells.push(value);
            }
            rows_out.push(cells);
        }

        Ok((columns, rows_out))
    }

    /// Row and fraud counts for the stats command.
    pub fn stats(&self) -> AppResult<(i64, i64)> {
        let conn = self.connection();
        let total: i64 = conn
            .query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))
            .map_err(|e| AppError::Data(e.to_string()))?;
        let frauds: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM transactions WHERE is_fraud = 1",
                [],
                |row| row.get(0),
            )
            .map_err(|e| AppError::Data(e.to_string()))?;
        Ok((total, frauds))
    }
}

fn value_ref_to_json(value: &ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(*i),
        ValueRef::Real(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(t) => serde_json::Value::String(String::from_utf8_lossy(t).to_string()),
        ValueRef::Blob(b) => serde_json::Value::String(format!("<{} byte blob>", b.len())),
    }
}

fn value_ref_to_display(value: &ValueRef<'_>) -> String {
    match value_ref_to_json(value) {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_store() -> TransactionStore {
        let store = TransactionStore::open_in_memory().unwrap();
        {
            let conn = store.connection();
            conn.execute_batch(
                r#"
                CREATE TABLE transactions (
                    trans_date_trans_time TEXT,
                    cc_num INTEGER,
                    merchant TEXT,
                    category TEXT,
                    amt REAL,
                    is_fraud INTEGER,
                    transaction_month TEXT,
                    transaction_hour INTEGER
                );
                INSERT INTO transactions VALUES
                    ('2019-01-01 10:00:00', 1234567890, 'fraud_Acme', 'grocery_pos', 42.50, 0, '2019-01', 10),
                    ('2019-02-15 23:30:00', 9876543210, 'fraud_Binc', 'shopping_net', 310.00, 1, '2019-02', 23),
                    ('2020-12-31 07:45:00', 1234567890, 'fraud_Acme', 'misc_net', 5.10, 0, '2020-12', 7);
                "#,
            )
            .unwrap();
        }
        store
    }

    #[test]
    fn test_validate_select() {
        assert!(TransactionStore::validate_query("SELECT * FROM transactions").is_none());
        assert!(TransactionStore::validate_query("  select count(*) from transactions ; ").is_none());
    }

    #[test]
    fn test_validate_reject_delete() {
        let result = TransactionStore::validate_query("DELETE FROM transactions");
        assert!(result.is_some());
    }

    #[test]
    fn test_validate_reject_blocked_keyword_inside_select() {
        let result = TransactionStore::validate_query("SELECT 1; DROP TABLE transactions");
        assert!(result.is_some());
    }

    #[test]
    fn test_blocked_keyword_never_executed() {
        let store = seeded_store();
        let result = store.execute_query("DELETE FROM transactions");
        assert!(!result.success);
        assert!(result.error.is_some());

        // Table untouched
        let (total, _) = store.stats().unwrap();
        assert_eq!(total, 3);
    }

    #[test]
    fn test_execute_query_basic() {
        let store = seeded_store();
        let result = store.execute_query("SELECT COUNT(*) AS cnt FROM transactions");
        assert!(result.success);
        assert_eq!(result.row_count, 1);
        assert_eq!(result.columns, vec!["cnt"]);
        assert_eq!(result.rows[0][0], serde_json::json!(3));
    }

    #[test]
    fn test_execute_query_appends_limit() {
        let store = seeded_store();
        // No LIMIT clause: cap appended, query still well-formed
        let result = store.execute_query("SELECT merchant FROM transactions ORDER BY merchant");
        assert!(result.success);
        assert!(result.row_count <= MAX_QUERY_ROWS);
    }

    #[test]
    fn test_execute_query_caps_oversized_result() {
        let store = TransactionStore::open_in_memory().unwrap();
        {
            let conn = store.connection();
            conn.execute_batch("CREATE TABLE transactions (id INTEGER, amt REAL);")
                .unwrap();
            let mut insert = conn
                .prepare("INSERT INTO transactions VALUES (?1, ?2)")
                .unwrap();
            for i in 0..(MAX_QUERY_ROWS + 50) {
                insert.execute(rusqlite::params![i as i64, 1.0f64]).unwrap();
            }
        }

        let result = store.execute_query("SELECT id FROM transactions");
        assert!(result.success);
        assert_eq!(result.row_count, MAX_QUERY_ROWS);
        assert_eq!(result.rows.len(), MAX_QUERY_ROWS);
    }

    #[test]
    fn test_execute_query_respects_existing_limit() {
        let store = seeded_store();
        let result = store.execute_query("SELECT merchant FROM transactions LIMIT 2");
        assert!(result.success);
        assert_eq!(result.row_count, 2);
    }

    #[test]
    fn test_execute_query_failure_reports_error() {
        let store = seeded_store();
        let result = store.execute_query("SELECT nonexistent_column FROM transactions");
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_filter_clause_supported() {
        let store = seeded_store();
        let result = store.execute_query(
            "SELECT COUNT(*) FILTER (WHERE is_fraud = 1) AS fraud_count, COUNT(*) AS total \
             FROM transactions",
        );
        assert!(result.success);
        assert_eq!(result.rows[0][0], serde_json::json!(1));
        assert_eq!(result.rows[0][1], serde_json::json!(3));
    }

    #[test]
    fn test_schema_and_samples() {
        let store = seeded_store();
        assert!(store.schema().contains("transactions"));
        assert!(store.schema().contains("is_fraud"));

        let sample = store.sample_rows(2).unwrap();
        assert!(sample.contains("merchant"));
        assert!(sample.contains("fraud_Acme"));
    }

    #[test]
    fn test_column_stats() {
        let store = seeded_store();
        let stats = store.column_stats();
        assert!(stats.contains("Date range: 2019-01-01 to 2020-12-31"));
        assert!(stats.contains("Total transactions: 3"));
        assert!(stats.contains("grocery_pos"));
    }

    #[test]
    fn test_column_stats_degrades_on_missing_table() {
        let store = TransactionStore::open_in_memory().unwrap();
        assert_eq!(store.column_stats(), "");
    }
}
