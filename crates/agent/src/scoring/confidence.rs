//! Per-source confidence scoring.
//!
//! Dispatch is a fixed table keyed by source type; each entry is a pure
//! function of the confidence context.

use crate::types::{ConfidenceContext, SourceType};

type ConfidenceFn = fn(&ConfidenceContext) -> f32;

const STRATEGIES: &[(SourceType, ConfidenceFn)] = &[
    (SourceType::Sql, sql_confidence),
    (SourceType::Rag, rag_confidence),
    (SourceType::Both, combined_confidence),
];

/// Compute confidence for a response. Unknown or error source types score a
/// neutral 0.5.
pub fn compute_confidence(ctx: &ConfidenceContext) -> f32 {
    let Some(source_type) = ctx.source_type else {
        return 0.5;
    };
    STRATEGIES
        .iter()
        .find(|(st, _)| *st == source_type)
        .map(|(_, strategy)| strategy(ctx))
        .unwrap_or(0.5)
}

/// Confidence from SQL query success and result count.
fn sql_confidence(ctx: &ConfidenceContext) -> f32 {
    if !ctx.sql_success {
        return 0.0;
    }
    if ctx.sql_row_count > 0 {
        1.0
    } else {
        0.5
    }
}

/// Confidence from the average similarity of retrieved passages.
fn rag_confidence(ctx: &ConfidenceContext) -> f32 {
    if ctx.similarity_scores.is_empty() {
        return 0.5;
    }
    let avg = ctx.similarity_scores.iter().sum::<f32>() / ctx.similarity_scores.len() as f32;
    avg.clamp(0.0, 1.0)
}

/// Unweighted average of the SQL and RAG confidence values.
fn combined_confidence(ctx: &ConfidenceContext) -> f32 {
    (sql_confidence(ctx) + rag_confidence(ctx)) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(source_type: SourceType) -> ConfidenceContext {
        ConfidenceContext {
            source_type: Some(source_type),
            ..Default::default()
        }
    }

    #[test]
    fn test_sql_failure_zero() {
        let context = ctx(SourceType::Sql);
        assert_eq!(compute_confidence(&context), 0.0);
    }

    #[test]
    fn test_sql_success_with_rows() {
        let context = ConfidenceContext {
            sql_success: true,
            sql_row_count: 5,
            ..ctx(SourceType::Sql)
        };
        assert_eq!(compute_confidence(&context), 1.0);
    }

    #[test]
    fn test_sql_success_empty_result() {
        let context = ConfidenceContext {
            sql_success: true,
            sql_row_count: 0,
            ..ctx(SourceType::Sql)
        };
        assert_eq!(compute_confidence(&context), 0.5);
    }

    #[test]
    fn test_rag_mean_of_scores() {
        let context = ConfidenceContext {
            similarity_scores: vec![0.6, 0.8],
            ..ctx(SourceType::Rag)
        };
        assert!((compute_confidence(&context) - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_rag_no_scores_neutral() {
        assert_eq!(compute_confidence(&ctx(SourceType::Rag)), 0.5);
    }

    #[test]
    fn test_rag_clamped() {
        let context = ConfidenceContext {
            similarity_scores: vec![1.4, 1.2],
            ..ctx(SourceType::Rag)
        };
        assert_eq!(compute_confidence(&context), 1.0);
    }

    #[test]
    fn test_both_averages_independent_scores() {
        let context = ConfidenceContext {
            sql_success: true,
            sql_row_count: 3,
            similarity_scores: vec![0.5, 0.7],
            ..ctx(SourceType::Both)
        };
        // (1.0 + 0.6) / 2
        assert!((compute_confidence(&context) - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_error_and_unset_neutral() {
        assert_eq!(compute_confidence(&ctx(SourceType::Error)), 0.5);
        assert_eq!(compute_confidence(&ConfidenceContext::default()), 0.5);
    }
}
