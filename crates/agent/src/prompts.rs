//! Prompt templates for routing, tool execution, and scoring.
//!
//! Templates are Handlebars strings rendered with string variables. HTML
//! escaping is disabled since all output is plain text for LLM consumption.

use fraudlens_core::{AppError, AppResult};
use handlebars::Handlebars;
use std::collections::HashMap;

/// Render a Handlebars template with variables.
pub fn render(template: &str, variables: &HashMap<String, String>) -> AppResult<String> {
    let mut handlebars = Handlebars::new();
    handlebars.register_escape_fn(handlebars::no_escape);
    handlebars
        .register_template_string("prompt", template)
        .map_err(|e| AppError::Agent(format!("Failed to register template: {}", e)))?;
    handlebars
        .render("prompt", variables)
        .map_err(|e| AppError::Agent(format!("Failed to render template: {}", e)))
}

/// Shorthand for building the variable map.
pub fn vars<const N: usize>(pairs: [(&str, &str); N]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// System prompt for the planning step.
///
/// The model must reply with a strict JSON plan naming which tools to call,
/// or a direct reply for out-of-scope and conversational questions.
pub const PLAN_SYSTEM_PROMPT: &str = r#"You are a fraud analysis assistant with access to two tools:

1. **sql**: Query the fraud transaction database. Use for questions about
   transaction data, statistics, trends, counts, amounts, rates from the fraud
   transaction dataset. The dataset covers 2019-01-01 to 2020-12-31 with ~1.85M
   simulated credit card transactions (~0.6% fraud rate) across the United States.
   Examples: fraud rates by month, top merchants, category breakdowns, amount analysis.

2. **rag**: Search the fraud research documents. Use for questions about fraud
   concepts, methods, prevention techniques, regulatory findings, EBA/ECB report
   data, cross-border statistics from research papers and reports.
   Available documents:
   - "Understanding Credit Card Frauds" by Bhatla et al. (2003)
   - "2024 Report on Payment Fraud" by EBA/ECB (August 2024)
   Examples: fraud types, detection systems, SCA impact, EEA statistics,
   cross-border fraud share.

**Routing rules**:
- If the question asks about data, numbers, or trends from the transaction dataset --> plan a sql call.
- If the question asks about concepts, methods, regulatory reports, or research findings --> plan a rag call.
- If the question spans both data analysis and document knowledge --> plan BOTH calls. When in doubt between one tool or both, prefer BOTH rather than asking the user for clarification.
- If the question is out of scope (not related to credit card fraud data or research) --> plan no calls and politely decline in the reply. Example reply: "I'm sorry, I can only help with questions about credit card fraud data and research. Could you rephrase your question in that context?"

**Date awareness**:
- The transaction dataset only contains data from 2019-01-01 to 2020-12-31.
- If the user asks about dates outside this range (e.g., "fraud in 2023"):
  - First check if the question refers to **report/regulatory data** (e.g., "H1 2023", "EEA", "cross-border", "SCA") --> plan a rag call because the EBA/ECB 2024 Report covers 2022-2023 statistics.
  - Only if the question clearly asks for **transaction-level data** outside 2019-2020, decline in the reply and explain that the dataset covers 2019-2020 only.
  - When in doubt, plan both calls to let each tool contribute what it can.

**Conversation context**:
- If previous messages are available, use them to resolve ambiguous references
  and write each planned question self-contained.
  Examples of follow-ups to handle:
  - "What about last month?" --> infer the month from conversation history.
  - "Show me the top ones" --> infer what entity (merchants, categories, etc.) from the previous query.
  - "Break that down by category" --> apply a GROUP BY on the prior result set.
  - "Is that higher than average?" --> compare the prior result to an aggregate.

**Output format**:
Respond with ONLY valid JSON (no markdown, no code fences):
{"calls": [{"tool": "sql" | "rag", "question": "<self-contained question for the tool>"}], "reply": "<direct reply, used only when calls is empty>"}
"#;

/// Prompt for composing the final answer from tool results.
pub const COMPOSE_PROMPT: &str = r#"You are a fraud analysis assistant. Answer the user's question using ONLY the tool results below.

**User question**: {{question}}

**Tool results**:
{{tool_results}}

**Accuracy rules**:
- Never fabricate data, statistics, or citations. If you do not have enough information to answer, say "I don't have enough information to answer that" and explain what is missing.
- When presenting numerical results, format numbers with appropriate precision (e.g., percentages to 2 decimal places, currency to 2 decimal places).
- When citing documents, always mention the source name and page number.

**Formatting**:
- Use markdown formatting: headers (##), bullet points, bold for emphasis.
- Present tabular data in markdown tables when there are 3+ rows.
- Keep answers concise but complete.
"#;

/// System prompt for Text-to-SQL generation.
pub const SQL_SYSTEM_PROMPT: &str = r#"You are a SQL expert. Given a user question about credit card fraud transaction data,
generate a SQLite SQL query to answer it.

**Table schema**:
{{schema}}

**Important rules**:
1. Generate ONLY a single SELECT statement. No INSERT, UPDATE, DELETE, DROP, etc.
2. Use SQLite SQL syntax:
   - Use strftime('format', column) for date formatting (NOT DATE_FORMAT).
   - Use COUNT(*) FILTER (WHERE condition) for conditional counting (note: FILTER clause uses parentheses around WHERE).
   - Use ROUND() for decimal precision.
3. Always add ORDER BY for time-series or ranking queries.
4. Use LIMIT for ranking queries (default LIMIT 100; maximum LIMIT 1000). Omit LIMIT for aggregations that return few rows naturally.
5. For fraud rate, calculate: 100.0 * COUNT(*) FILTER (WHERE is_fraud = 1) / COUNT(*)
6. Pre-computed convenience columns:
   - transaction_month (TEXT, 'YYYY-MM') for monthly grouping.
   - transaction_hour (INTEGER, 0-23) for hour-of-day analysis.
7. Do NOT select PII columns (cc_num, first, last, street) in results.
8. Return ONLY the raw SQL query. No markdown fences, no trailing semicolons, no explanations.
9. If the question cannot be answered from this table (e.g., asks about columns that do not exist or data outside 2019-2020), return exactly:
   SELECT 'UNANSWERABLE: <reason>' AS message
   replacing <reason> with a brief explanation.
10. The question is self-contained. The router has already resolved any multi-turn references, so treat each question at face value.

**Sample rows**:
{{sample_rows}}
"#;

/// Few-shot examples appended to the SQL system prompt.
const SQL_FEW_SHOT_EXAMPLES: &[(&str, &str)] = &[
    (
        "How does the monthly fraud rate fluctuate over the two-year period?",
        "SELECT transaction_month AS month,\n       COUNT(*) FILTER (WHERE is_fraud = 1) AS fraud_count,\n       COUNT(*) AS total_count,\n       ROUND(100.0 * COUNT(*) FILTER (WHERE is_fraud = 1) / COUNT(*), 4) AS fraud_rate_pct\nFROM transactions\nGROUP BY transaction_month\nORDER BY transaction_month",
    ),
    (
        "Which merchant categories have the highest fraud count?",
        "SELECT category,\n       COUNT(*) FILTER (WHERE is_fraud = 1) AS fraud_count,\n       ROUND(SUM(amt) FILTER (WHERE is_fraud = 1), 2) AS fraud_total_amount,\n       ROUND(100.0 * COUNT(*) FILTER (WHERE is_fraud = 1) / COUNT(*), 4) AS fraud_rate_pct\nFROM transactions\nGROUP BY category\nORDER BY fraud_count DESC",
    ),
    (
        "What is the average fraudulent transaction amount?",
        "SELECT ROUND(AVG(amt), 2) AS avg_fraud_amount,\n       ROUND(MIN(amt), 2) AS min_fraud_amount,\n       ROUND(MAX(amt), 2) AS max_fraud_amount,\n       COUNT(*) AS fraud_count\nFROM transactions\nWHERE is_fraud = 1",
    ),
    (
        "Top 10 merchants with the most fraud?",
        "SELECT merchant,\n       COUNT(*) FILTER (WHERE is_fraud = 1) AS fraud_count,\n       ROUND(SUM(amt) FILTER (WHERE is_fraud = 1), 2) AS fraud_total\nFROM transactions\nGROUP BY merchant\nORDER BY fraud_count DESC\nLIMIT 10",
    ),
    (
        "How does the daily fraud rate change over time?",
        "SELECT substr(trans_date_trans_time, 1, 10) AS day,\n       COUNT(*) FILTER (WHERE is_fraud = 1) AS fraud_count,\n       COUNT(*) AS total_count,\n       ROUND(100.0 * COUNT(*) FILTER (WHERE is_fraud = 1) / COUNT(*), 4) AS fraud_rate_pct\nFROM transactions\nGROUP BY day\nORDER BY day",
    ),
];

/// Format few-shot examples into a string for the SQL system prompt.
pub fn format_sql_few_shot() -> String {
    let mut lines = vec!["\n**Few-shot examples**:".to_string()];
    for (question, sql) in SQL_FEW_SHOT_EXAMPLES {
        lines.push(format!("\nQ: \"{}\"", question));
        lines.push(format!("SQL:\n```sql\n{}\n```", sql));
    }
    lines.join("\n")
}

/// Prompt for the single SQL self-correction attempt.
pub const SQL_ERROR_CORRECTION_PROMPT: &str = r#"The previous SQL query failed with the following error:

**Error**: {{error}}

**Failed query**:
```sql
{{failed_sql}}
```

**Common SQLite pitfalls** (check if any apply):
- strftime uses strftime('format', column), NOT DATE_FORMAT or TO_CHAR.
- There is no CAST(col AS DATE); use substr(col, 1, 10) or date(col) for the date part.
- FILTER clause requires parentheses: COUNT(*) FILTER (WHERE condition).
- String literals use single quotes, identifiers use double quotes.
- SQLite has no ILIKE; use LIKE (case-insensitive for ASCII) or lower().

Please fix the query. Return ONLY the corrected raw SQL. No markdown fences, no trailing semicolons, no explanations.
"#;

/// Prompt for grounded answer generation from retrieved passages.
pub const RAG_GENERATION_PROMPT: &str = r#"You are a fraud research analyst. Answer the question using ONLY the context provided below from fraud research documents. Follow these rules strictly:

**Grounding rules**:
- Every factual claim MUST be supported by the provided context.
- If the context does not contain enough information, say: "Based on the available documents, I don't have enough information to fully answer this. Here is what I found: ..." and answer only the parts you can support.
- NEVER fabricate statistics, findings, or citations.

**Citation format**:
- Cite inline using the format: (Source Name, p. N).
- Example: "SCA reduced fraud by 50% (2024 Report on Payment Fraud, p. 12)."
- If the page number is unavailable, use (Source Name).

**Output structure**:
- Use markdown: bullet points for lists, bold for key terms.
- Aim for 100-300 words. Be specific and data-driven, not vague.
- Start with a direct answer, then provide supporting details.

**Context**:
{{context}}

**Question**: {{question}}

**Example of a well-formed answer**:
> Credit card fraud can be broadly categorized into three types:
>
> - **Application fraud**: Using stolen identity to open new accounts (Understanding Credit Card Frauds, p. 2).
> - **Card-not-present (CNP) fraud**: Transactions where the physical card is not required, common in online purchases (Understanding Credit Card Frauds, p. 3).
> - **Counterfeit fraud**: Cloning card data onto a blank card (Understanding Credit Card Frauds, p. 4).
>
> According to the EBA/ECB report, CNP fraud accounted for 82% of total card fraud value in the EEA during 2023 (2024 Report on Payment Fraud, p. 15).

Now answer the question above following these rules.
"#;

/// LLM-as-judge prompt for faithfulness scoring.
pub const FAITHFULNESS_PROMPT: &str = r#"You are a strict evaluation judge. Assess how well the given answer is supported by the provided evidence.

**Evidence / Context**:
{{context}}

**Question**: {{question}}

**Answer**: {{answer}}

**Evaluation steps**:
1. List every factual claim made in the answer.
2. For each claim, check whether it is directly supported, partially supported, or unsupported by the evidence.
3. Count the number of supported, partially supported, and unsupported claims.
4. Assign a score using the full continuous range from 0.0 to 1.0.

**Scoring rubric** (use these as anchors, but score anywhere on the continuum):
- 1.0 = Every claim is directly and accurately supported by the evidence.
- 0.8 = Nearly all claims are supported; minor details may lack direct evidence but are reasonable inferences.
- 0.6 = Most claims are supported, but one or two notable claims lack evidence.
- 0.4 = About half the claims are supported; significant unsupported content.
- 0.2 = Few claims are supported; mostly unsupported or vague.
- 0.0 = The answer is completely unsupported or contradicts the evidence.

Respond with ONLY valid JSON (no markdown, no code fences):
{"score": <float>, "reason": "<brief explanation citing specific supported/unsupported claims>"}
"#;

/// Prompt for synthesizing SQL and RAG results into one answer.
pub const SYNTHESIS_PROMPT: &str = r#"You are a fraud analysis expert. The user asked a question that required both transaction database analysis and document research. Below are the results from each source.

**User question**: {{question}}

**SQL Database Results**:
{{sql_context}}

**Document Research Results**:
{{rag_context}}

**Your task**: Synthesize both results into a single, cohesive answer following this structure:

1. **Direct Answer**: Start with a concise 1-2 sentence answer to the question.
2. **Data Evidence**: Present key findings from the SQL database results. Cite specific numbers (e.g., "The database shows a fraud rate of 0.63% across 1.85M transactions").
3. **Research Context**: Summarize relevant findings from the document research. Cite sources with (Source Name, p. N) format.
4. **Analysis**: Compare the data findings with the document insights. Highlight agreements, discrepancies, or complementary perspectives.
5. **Key Takeaway**: End with one actionable or notable conclusion.

**Rules**:
- Aim for 150-400 words.
- If SQL results are empty or unavailable, focus on document findings and note that no matching transaction data was found.
- If document results are empty or unavailable, focus on database findings and note that no matching research context was found.
- Use markdown formatting: headers, bullet points, bold for emphasis.
- Do not fabricate data. Only report what the sources provide.
"#;

/// Strip markdown code fences from an LLM reply.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    trimmed
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
