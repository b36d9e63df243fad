//! Deterministic replay (§4.7): re-run a traced query against the live
//! indices and diff the result against what was originally returned.
//!
//! Grounded on `llmspell-graph`'s `TemporalQuery` "read as of a point in
//! time" pattern, simplified to this engine's single-process, append-
//! mostly scope: a chunk that still exists in the vector index is
//! assumed unchanged since the trace (chunks are mutated only by the
//! lifecycle sweep and the curator, never deleted except on source
//! removal), so replay is reconstructible exactly when every chunk the
//! original trace returned is still present. When one is gone, this
//! fails with [`crate::error::TraceError::ReplayUnavailable`] rather
//! than silently answering from a different population (§4.7: "must
//! fail ... rather than produce misleading output").

use hippocore_context::RetrievalCore;
use hippocore_core::types::{QueryTrace, RetrievedChunkRef};
use uuid::Uuid;

use crate::error::{Result, TraceError};

/// Element-wise comparison of a trace's `retrieved_chunks` against a
/// fresh run's (§4.7, §8 round-trip law: "retrieved chunks matching
/// `t.retrieved_chunks` exactly, in the same order and with scores
/// within 1e-6").
#[derive(Debug, Clone)]
pub struct StructuralDiff {
    pub original_order: Vec<Uuid>,
    pub replay_order: Vec<Uuid>,
    /// Chunk ids present in the replay but not the original.
    pub added: Vec<Uuid>,
    /// Chunk ids present in the original but not the replay.
    pub removed: Vec<Uuid>,
    /// True iff the two orders name exactly the same chunk ids in
    /// exactly the same sequence.
    pub order_matches: bool,
    /// Largest absolute score difference among chunks present in both,
    /// by id (not position) -- `None` when there is no overlap.
    pub max_score_delta: Option<f32>,
}

impl StructuralDiff {
    /// The round-trip law holds exactly: same ids, same order, scores
    /// within 1e-6 (§8).
    #[must_use]
    pub fn is_exact_match(&self) -> bool {
        self.order_matches && self.max_score_delta.map_or(true, |d| d <= 1e-6)
    }
}

fn compute_diff(original: &[RetrievedChunkRef], replay: &[RetrievedChunkRef]) -> StructuralDiff {
    let original_order: Vec<Uuid> = original.iter().map(|r| r.chunk_id).collect();
    let replay_order: Vec<Uuid> = replay.iter().map(|r| r.chunk_id).collect();

    let added = replay_order.iter().filter(|id| !original_order.contains(id)).copied().collect();
    let removed = original_order.iter().filter(|id| !replay_order.contains(id)).copied().collect();
    let order_matches = original_order == replay_order;

    let max_score_delta = original
        .iter()
        .filter_map(|o| replay.iter().find(|r| r.chunk_id == o.chunk_id).map(|r| (o.score - r.score).abs()))
        .fold(None, |acc: Option<f32>, delta| Some(acc.map_or(delta, |a| a.max(delta))));

    StructuralDiff {
        original_order,
        replay_order,
        added,
        removed,
        order_matches,
        max_score_delta,
    }
}

/// The result of a successful replay: the new trace produced by
/// re-running the query, plus its structural diff against the
/// original.
#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    pub new_trace: QueryTrace,
    pub diff: StructuralDiff,
}

/// Re-run `original`'s query against the live pipeline and diff the
/// result (§4.7 Replay).
///
/// # Errors
///
/// Returns [`TraceError::ReplayUnavailable`] when any chunk the
/// original trace retrieved is no longer present in the vector index
/// (source data deleted) -- the indices can no longer be reconstructed
/// as of the trace's timestamp. Returns [`TraceError::Context`] if the
/// re-run itself fails (e.g. the vector tier is down).
pub async fn replay(core: &RetrievalCore, original: &QueryTrace) -> Result<ReplayOutcome> {
    for retrieved in &original.retrieved_chunks {
        let exists = core.chunk_exists(retrieved.chunk_id).await?;
        if !exists {
            return Err(TraceError::ReplayUnavailable {
                query_id: original.query_id,
                reason: format!("chunk {} no longer present in the vector index", retrieved.chunk_id),
            });
        }
    }

    let (_response, new_trace) = core
        .retrieve(&original.query, original.user_context.as_deref(), Some(&original.mode_detected))
        .await?;

    let diff = compute_diff(&original.retrieved_chunks, &new_trace.retrieved_chunks);
    Ok(ReplayOutcome { new_trace, diff })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_ref(id: Uuid, score: f32, rank: usize) -> RetrievedChunkRef {
        RetrievedChunkRef {
            chunk_id: id,
            score,
            source_tier: "vector".to_string(),
            rank,
        }
    }

    #[test]
    fn identical_sequences_are_an_exact_match() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let original = vec![chunk_ref(a, 0.9, 0), chunk_ref(b, 0.8, 1)];
        let replay_result = vec![chunk_ref(a, 0.9, 0), chunk_ref(b, 0.8, 1)];
        let diff = compute_diff(&original, &replay_result);
        assert!(diff.is_exact_match());
        assert!(diff.added.is_empty());
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn reordering_is_detected() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let original = vec![chunk_ref(a, 0.9, 0), chunk_ref(b, 0.8, 1)];
        let replay_result = vec![chunk_ref(b, 0.8, 0), chunk_ref(a, 0.9, 1)];
        let diff = compute_diff(&original, &replay_result);
        assert!(!diff.order_matches);
        assert!(diff.added.is_empty());
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn score_drift_beyond_tolerance_fails_exact_match() {
        let a = Uuid::new_v4();
        let original = vec![chunk_ref(a, 0.9, 0)];
        let replay_result = vec![chunk_ref(a, 0.5, 0)];
        let diff = compute_diff(&original, &replay_result);
        assert!(!diff.is_exact_match());
        assert!(diff.max_score_delta.unwrap() > 1e-6);
    }

    #[test]
    fn missing_chunk_is_reported_as_removed() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let original = vec![chunk_ref(a, 0.9, 0), chunk_ref(b, 0.8, 1)];
        let replay_result = vec![chunk_ref(a, 0.9, 0)];
        let diff = compute_diff(&original, &replay_result);
        assert_eq!(diff.removed, vec![b]);
        assert!(diff.added.is_empty());
    }
}
