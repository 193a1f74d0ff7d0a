//! Heuristic grounding validation of final answers.
//!
//! Cross-checks that numeric and attributed claims in an answer actually
//! appear in the data the tools returned. This is a cheap lexical check, not
//! an LLM call.

use crate::types::{SqlRecord, SourceType};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Numbers at or below this magnitude are ignored; small numbers appear in
/// prose too often to be meaningful grounding evidence.
const MAGNITUDE_FLOOR: f64 = 10.0;

/// Absolute tolerance when matching an answer number against a data number.
const ABS_TOLERANCE: f64 = 0.1;

/// Relative tolerance when matching an answer number against a data number.
const REL_TOLERANCE: f64 = 0.01;

/// Fraction of ungrounded numbers above which the SQL check fails.
const UNGROUNDED_FAIL_RATIO: f64 = 0.5;

/// Maximum ungrounded numbers cited in a failure reason.
const MAX_CITED: usize = 3;

/// Minimum fraction of claim content words that must appear in the passages.
const CLAIM_COVERAGE_FLOOR: f64 = 0.3;

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d+(?:,\d{3})*(?:\.\d+)?)\b").unwrap());

static CLAIM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:according to|reported|found that|stated that)\s+(.{20,80}?)(?:\.|,|\n)")
        .unwrap()
});

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "of", "in", "to", "and", "that", "for",
];

/// Validate that an answer is grounded in its source data.
pub struct AnswerValidator;

impl AnswerValidator {
    pub fn new() -> Self {
        Self
    }

    /// Returns (passed, reason).
    pub fn validate(
        &self,
        answer: &str,
        source_type: SourceType,
        sql_results: &[SqlRecord],
        retrieved_passages: &[String],
    ) -> (bool, String) {
        let mut issues = Vec::new();

        let run_sql = matches!(source_type, SourceType::Sql | SourceType::Both);
        let run_rag = matches!(source_type, SourceType::Rag | SourceType::Both);

        if run_sql {
            if let Some(issue) = check_sql_numbers(answer, sql_results) {
                issues.push(issue);
            }
        }
        if run_rag {
            if let Some(issue) = check_rag_claims(answer, retrieved_passages) {
                issues.push(issue);
            }
        }

        if issues.is_empty() {
            (true, "Answer is grounded in source data".to_string())
        } else {
            (false, issues.join("; "))
        }
    }
}

impl Default for AnswerValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Check that numbers cited in the answer exist in the SQL results.
fn check_sql_numbers(answer: &str, sql_results: &[SqlRecord]) -> Option<String> {
    if sql_results.is_empty() {
        return None;
    }

    // Each distinct number counts once toward the ratio, however often the
    // answer repeats it
    let mut seen = HashSet::new();
    let answer_numbers: Vec<f64> = NUMBER_RE
        .captures_iter(answer)
        .filter_map(|cap| {
            let normalized = cap[1].replace(',', "");
            if !seen.insert(normalized.clone()) {
                return None;
            }
            normalized.parse::<f64>().ok()
        })
        .collect();
    if answer_numbers.is_empty() {
        return None;
    }

    let mut data_numbers: Vec<f64> = Vec::new();
    for record in sql_results {
        for value in record.values() {
            match value {
                serde_json::Value::Number(n) => {
                    if let Some(v) = n.as_f64() {
                        data_numbers.push(v);
                        data_numbers.push((v * 100.0).round() / 100.0);
                        data_numbers.push((v * 10_000.0).round() / 10_000.0);
                    }
                }
                serde_json::Value::String(s) => {
                    if let Ok(v) = s.parse::<f64>() {
                        data_numbers.push(v);
                    }
                }
                _ => {}
            }
        }
    }

    let mut ungrounded: Vec<f64> = Vec::new();
    for num in &answer_numbers {
        if *num <= MAGNITUDE_FLOOR {
            continue;
        }
        let matched = data_numbers.iter().any(|d| {
            (num - d).abs() < ABS_TOLERANCE || (num - d).abs() / d.abs().max(1.0) < REL_TOLERANCE
        });
        if !matched {
            ungrounded.push(*num);
        }
    }

    if !ungrounded.is_empty()
        && ungrounded.len() as f64 > answer_numbers.len() as f64 * UNGROUNDED_FAIL_RATIO
    {
        let samples: Vec<String> = ungrounded
            .iter()
            .take(MAX_CITED)
            .map(|n| format!("{}", *n as i64))
            .collect();
        return Some(format!(
            "Some numbers in the answer may not match query results: {}",
            samples.join(", ")
        ));
    }

    None
}

/// Check that attributed claims are supported by the retrieved passages.
fn check_rag_claims(answer: &str, retrieved_passages: &[String]) -> Option<String> {
    if retrieved_passages.is_empty() {
        return None;
    }

    let passages_joined = retrieved_passages
        .iter()
        .map(|p| p.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");

    let answer_lower = answer.to_lowercase();
    for cap in CLAIM_RE.captures_iter(&answer_lower) {
        let claim = &cap[1];
        let content_words: HashSet<&str> = claim
            .split_whitespace()
            .filter(|w| !STOPWORDS.contains(w))
            .collect();
        if content_words.is_empty() {
            continue;
        }
        let covered = content_words
            .iter()
            .filter(|w| passages_joined.contains(**w))
            .count();
        let coverage = covered as f64 / content_words.len() as f64;
        if coverage < CLAIM_COVERAGE_FLOOR {
            let truncated: String = claim.trim().chars().take(50).collect();
            return Some(format!(
                "Some claims may not be supported by source documents: \"{}...\"",
                truncated
            ));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, serde_json::Value)]) -> SqlRecord {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_grounded_numbers_pass() {
        let validator = AnswerValidator::new();
        let results = vec![record(&[
            ("fraud_count", serde_json::json!(10748)),
            ("rate", serde_json::json!(0.58)),
        ])];
        let (passed, reason) = validator.validate(
            "There were 10748 fraudulent transactions with a rate of 0.58%.",
            SourceType::Sql,
            &results,
            &[],
        );
        assert!(passed, "{}", reason);
        assert_eq!(reason, "Answer is grounded in source data");
    }

    #[test]
    fn test_invented_number_fails() {
        let validator = AnswerValidator::new();
        let results = vec![record(&[("fraud_count", serde_json::json!(10748))])];
        let (passed, reason) = validator.validate(
            "There were 913,204,000 transactions.",
            SourceType::Sql,
            &results,
            &[],
        );
        assert!(!passed);
        assert!(reason.contains("913204000"));
    }

    #[test]
    fn test_small_numbers_ignored() {
        let validator = AnswerValidator::new();
        let results = vec![record(&[("cnt", serde_json::json!(10748))])];
        let (passed, _) = validator.validate(
            "The top 5 categories over 2 years show 10748 cases.",
            SourceType::Sql,
            &results,
            &[],
        );
        assert!(passed);
    }

    #[test]
    fn test_relative_tolerance_accepts_rounded() {
        let validator = AnswerValidator::new();
        let results = vec![record(&[("total", serde_json::json!(1_852_394))])];
        // 1852000 is within 1% of 1852394
        let (passed, _) = validator.validate(
            "Roughly 1852000 transactions were analyzed.",
            SourceType::Sql,
            &results,
            &[],
        );
        assert!(passed);
    }

    #[test]
    fn test_repeated_number_counts_once() {
        let validator = AnswerValidator::new();
        let results = vec![record(&[("cnt", serde_json::json!(10748))])];
        // 99999 is ungrounded but repeated; counted once, it stays at half of
        // the two distinct numbers and does not tip the fail ratio
        let (passed, _) = validator.validate(
            "Of 10748 cases, about 99999 stood out; yes, 99999.",
            SourceType::Sql,
            &results,
            &[],
        );
        assert!(passed);
    }

    #[test]
    fn test_no_sql_results_passes() {
        let validator = AnswerValidator::new();
        let (passed, _) = validator.validate(
            "There were 99999 cases.",
            SourceType::Sql,
            &[],
            &[],
        );
        assert!(passed);
    }

    #[test]
    fn test_supported_claim_passes() {
        let validator = AnswerValidator::new();
        let passages = vec![
            "card-not-present fraud accounted for the majority of card fraud value in the EEA"
                .to_string(),
        ];
        let (passed, _) = validator.validate(
            "According to the report, card-not-present fraud accounted for the majority of losses.",
            SourceType::Rag,
            &[],
            &passages,
        );
        assert!(passed);
    }

    #[test]
    fn test_unsupported_claim_fails() {
        let validator = AnswerValidator::new();
        let passages = vec!["skimming devices copy magnetic stripe data".to_string()];
        let (passed, reason) = validator.validate(
            "According to the study, quantum computers already break all encryption today.",
            SourceType::Rag,
            &[],
            &passages,
        );
        assert!(!passed);
        assert!(reason.contains("may not be supported"));
    }

    #[test]
    fn test_both_concatenates_issues() {
        let validator = AnswerValidator::new();
        let results = vec![record(&[("cnt", serde_json::json!(100))])];
        let passages = vec!["skimming devices copy magnetic stripe data".to_string()];
        let (passed, reason) = validator.validate(
            "According to the study, quantum computers already break encryption, and we \
             saw 555555 and 777777 events.",
            SourceType::Both,
            &results,
            &passages,
        );
        assert!(!passed);
        assert!(reason.contains("; "));
    }

    #[test]
    fn test_error_source_passes_trivially() {
        let validator = AnswerValidator::new();
        let (passed, reason) = validator.validate(
            "Anything at all 123456789.",
            SourceType::Error,
            &[],
            &[],
        );
        assert!(passed);
        assert_eq!(reason, "Answer is grounded in source data");
    }
}
