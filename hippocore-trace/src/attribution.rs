//! Failure attribution (§4.7): classify a trace into `context_bug` /
//! `model_bug` / `system_error`, plus the one mechanically detectable
//! context-bug subcategory the spec names — wrong-lifecycle.
//!
//! Grounded on the spec's own worked scenario (§8 scenario 5): a query
//! containing a "give me the current state of things" token that comes
//! back with an archived/demoted/rehydratable chunk is a context bug,
//! not a downstream model failure, because the retrieval pipeline
//! handed stale context to a query that explicitly asked for fresh
//! context.

use hippocore_core::traits::VectorIndex;
use hippocore_core::types::{ErrorType, QueryTrace, Stage};
use regex::Regex;
use std::sync::LazyLock;

use crate::error::Result;

static CURRENT_TOKEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(current|latest|now|today|recent)\b").unwrap());

/// The attributed classification of one trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    pub error_type: ErrorType,
    /// The one named subcategory (`"wrong_lifecycle"`), or a looser
    /// descriptive tag for the generic context_bug cases this module
    /// can still detect mechanically (e.g. `"ranking_error"`). `None`
    /// when the classification carries no further detail.
    pub sub_category: Option<String>,
}

/// §4.7 "Wrong-lifecycle detection": the query names the present
/// (`current`, `latest`, `now`, `today`, `recent`) and at least one
/// returned chunk is not `active`.
#[must_use]
pub fn is_wrong_lifecycle(query: &str, retrieved_stages: &[Stage]) -> bool {
    CURRENT_TOKEN_PATTERN.is_match(query)
        && retrieved_stages
            .iter()
            .any(|s| matches!(s, Stage::Archived | Stage::Demoted | Stage::Rehydratable))
}

/// Classify a trace given the lifecycle stage of each chunk it
/// returned. Pure and synchronous — callers that already have the
/// stages (e.g. from a `RetrievalResponse`) can skip the I/O that
/// [`attribute`] does to fetch them.
#[must_use]
pub fn classify(trace: &QueryTrace, retrieved_stages: &[Stage]) -> Option<Attribution> {
    if is_wrong_lifecycle(&trace.query, retrieved_stages) {
        return Some(Attribution {
            error_type: ErrorType::ContextBug,
            sub_category: Some("wrong_lifecycle".to_string()),
        });
    }

    if let Some(error_type) = trace.error_type {
        // The pipeline already assigned a kind (timeout, index failure,
        // ...); attribution's job here is just to carry it forward,
        // since §4.7's system_error bucket is exactly that set.
        return Some(Attribution {
            error_type,
            sub_category: None,
        });
    }

    // §4.5.4: a candidate that fails ground-truth verification is
    // demoted, not removed, and the trace's `verification_result`
    // records whether anything in the verified window failed. A query
    // that still came back with a failed-verification candidate in its
    // final result is a ranking error, not a model failure -- the
    // pipeline handed the consumer a context item it could not itself
    // verify as grounded.
    if trace.verification_result == Some(false) {
        return Some(Attribution {
            error_type: ErrorType::ContextBug,
            sub_category: Some("ranking_error".to_string()),
        });
    }

    None
}

/// Classify a persisted trace, resolving each retrieved chunk's current
/// lifecycle stage from the vector index (the authoritative chunk
/// store) first. Returns `Ok(None)` when nothing about the trace is
/// mechanically attributable — not every trace is a failure.
///
/// # Errors
///
/// Returns an error if the vector index lookup fails.
pub async fn attribute(trace: &QueryTrace, vector_index: &dyn VectorIndex) -> Result<Option<Attribution>> {
    let mut stages = Vec::with_capacity(trace.retrieved_chunks.len());
    for retrieved in &trace.retrieved_chunks {
        if let Some(chunk) = vector_index.get(retrieved.chunk_id).await.map_err(crate::error::TraceError::Core)? {
            stages.push(chunk.metadata.stage);
        }
    }
    Ok(classify(trace, &stages))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hippocore_core::types::RetrievedChunkRef;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn trace(query: &str, error_type: Option<ErrorType>, verification_result: Option<bool>) -> QueryTrace {
        QueryTrace {
            query_id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            query: query.to_string(),
            user_context: None,
            mode_detected: "execution".to_string(),
            mode_confidence: 0.9,
            stores_queried: vec!["vector".to_string()],
            routing_logic: "default".to_string(),
            retrieved_chunks: vec![RetrievedChunkRef {
                chunk_id: Uuid::new_v4(),
                score: 0.5,
                source_tier: "vector".to_string(),
                rank: 0,
            }],
            phase_latencies_ms: HashMap::new(),
            verification_result,
            output: None,
            total_latency_ms: 10,
            error: None,
            error_type,
        }
    }

    #[test]
    fn wrong_lifecycle_requires_both_current_token_and_stale_stage() {
        assert!(is_wrong_lifecycle("what's the current build pipeline?", &[Stage::Archived]));
        assert!(!is_wrong_lifecycle("what's the current build pipeline?", &[Stage::Active]));
        assert!(!is_wrong_lifecycle("what was the build pipeline last year?", &[Stage::Archived]));
    }

    #[test]
    fn classify_prefers_wrong_lifecycle_over_system_error() {
        let t = trace("what is the current status?", Some(ErrorType::SystemError), None);
        let attribution = classify(&t, &[Stage::Demoted]).unwrap();
        assert_eq!(attribution.error_type, ErrorType::ContextBug);
        assert_eq!(attribution.sub_category.as_deref(), Some("wrong_lifecycle"));
    }

    #[test]
    fn classify_carries_forward_pipeline_error_type() {
        let t = trace("anything", Some(ErrorType::SystemError), None);
        let attribution = classify(&t, &[Stage::Active]).unwrap();
        assert_eq!(attribution.error_type, ErrorType::SystemError);
        assert!(attribution.sub_category.is_none());
    }

    #[test]
    fn classify_flags_failed_verification_as_ranking_error() {
        let t = trace("anything", None, Some(false));
        let attribution = classify(&t, &[Stage::Active]).unwrap();
        assert_eq!(attribution.error_type, ErrorType::ContextBug);
        assert_eq!(attribution.sub_category.as_deref(), Some("ranking_error"));
    }

    #[test]
    fn classify_returns_none_for_a_clean_trace() {
        let t = trace("anything", None, Some(true));
        assert!(classify(&t, &[Stage::Active]).is_none());
    }
}
