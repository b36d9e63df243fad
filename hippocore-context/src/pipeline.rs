//! The five named pipeline steps (§4.5.3): FILTER, DEDUPLICATE, RANK
//! (fusion), and COMPRESS/CURATE are pure functions over [`Candidate`]
//! so they can be unit-tested without a live index; RECALL itself
//! lives in [`crate::retrieval_core`] since it is the only step that
//! touches `Embedder`/`VectorIndex`/`GraphIndex`.
//!
//! Grounded on `llmspell-context::assembly::assembler::ContextAssembler`'s
//! filter-then-sort-then-enforce-budget shape, generalized from a
//! single confidence filter + token truncation to the spec's
//! stage-filter / content-hash dedup / RRF fusion / core-extended split.

use hippocore_core::types::{Chunk, Stage};
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

/// One candidate chunk moving through the pipeline, carrying its
/// per-tier rank (0-based, best first) so RANK can compute RRF without
/// re-querying any store.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub chunk: Chunk,
    /// tier name -> rank within that tier's result list.
    pub tier_ranks: HashMap<String, usize>,
    pub fusion_score: f32,
    /// `None` until the two-stage verification step runs; `Some(false)`
    /// means the candidate was demoted, not removed (§4.5.4).
    pub verified: Option<bool>,
}

impl Candidate {
    #[must_use]
    pub fn new(chunk: Chunk, tier: &str, rank: usize) -> Self {
        let mut tier_ranks = HashMap::new();
        tier_ranks.insert(tier.to_string(), rank);
        Self {
            chunk,
            tier_ranks,
            fusion_score: 0.0,
            verified: None,
        }
    }

    fn dedup_key(&self) -> String {
        normalize_text(&self.chunk.text)
    }
}

fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// FILTER (§4.5.3 step 2): drop archived chunks unless the query is
/// marked historical, and require the ingestion-time `verified` flag
/// when the mode's verification policy is `on`.
#[must_use]
pub fn filter(candidates: Vec<Candidate>, is_historical: bool, require_verified: bool) -> Vec<Candidate> {
    let before = candidates.len();
    let filtered: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| {
            let stage_ok = is_historical || c.chunk.metadata.stage != Stage::Archived;
            let verified_ok = !require_verified || c.chunk.metadata.verified;
            stage_ok && verified_ok
        })
        .collect();
    debug!(before, after = filtered.len(), "FILTER");
    filtered
}

/// DEDUPLICATE (§4.5.3 step 3): collapse chunks whose content hash or
/// normalized text matches, merging tier ranks so the surviving
/// representative keeps the best rank seen in any tier for each tier
/// it appeared in (fusion, below, needs that full per-tier picture).
#[must_use]
pub fn deduplicate(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let before = candidates.len();
    let mut by_key: HashMap<String, Candidate> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for candidate in candidates {
        let key = if candidate.chunk.content_hash.is_empty() {
            candidate.dedup_key()
        } else {
            candidate.chunk.content_hash.clone()
        };
        match by_key.get_mut(&key) {
            Some(existing) => {
                for (tier, rank) in candidate.tier_ranks {
                    existing
                        .tier_ranks
                        .entry(tier)
                        .and_modify(|r| *r = (*r).min(rank))
                        .or_insert(rank);
                }
            }
            None => {
                order.push(key.clone());
                by_key.insert(key, candidate);
            }
        }
    }

    let deduped: Vec<Candidate> = order.into_iter().filter_map(|key| by_key.remove(&key)).collect();
    debug!(before, after = deduped.len(), "DEDUPLICATE");
    deduped
}

/// RANK / FUSION (§4.5.3 step 4): Reciprocal Rank Fusion across tiers,
/// `score(c) = sum_tier 1 / (60 + rank_tier(c))`, tiers absent for a
/// candidate contributing 0, then scaled by the candidate's lifecycle
/// `Stage::fusion_multiplier` (Active 1.0, Demoted 0.7, Archived /
/// Rehydratable 0.3) so a stale chunk never outranks a fresh one with
/// an equal raw RRF score (§4.6). Ties broken by (a) higher `verified`,
/// (b) more recent `last_accessed`, (c) lexicographic `chunk_id`.
#[must_use]
pub fn rank_fusion(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    const RRF_K: f32 = 60.0;
    for candidate in &mut candidates {
        let raw: f32 = candidate.tier_ranks.values().map(|&rank| 1.0 / (RRF_K + rank as f32)).sum();
        candidate.fusion_score = raw * candidate.chunk.metadata.stage.fusion_multiplier();
    }
    candidates.sort_by(|a, b| {
        b.fusion_score
            .partial_cmp(&a.fusion_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.chunk.metadata.verified.cmp(&a.chunk.metadata.verified))
            .then_with(|| b.chunk.metadata.last_accessed.cmp(&a.chunk.metadata.last_accessed))
            .then_with(|| a.chunk.chunk_id.to_string().cmp(&b.chunk.chunk_id.to_string()))
    });
    trace!(count = candidates.len(), "RANK");
    candidates
}

/// The outcome of COMPRESS/CURATE: the split core/extended sets.
pub struct CuratedSet {
    pub core: Vec<Candidate>,
    pub extended: Vec<Candidate>,
}

fn token_count(candidate: &Candidate) -> usize {
    candidate.chunk.text.len().div_ceil(4)
}

/// COMPRESS / CURATE (§4.5.3 step 5): top `core_size` become core,
/// next `extended_size` become extended, the rest are dropped. Then
/// the mode's `token_budget` is enforced by evicting extended members
/// lowest-ranked first, then trimming the core set's last member if
/// still over budget (never below one core result).
#[must_use]
pub fn compress_curate(ranked: Vec<Candidate>, core_size: usize, extended_size: usize, token_budget: usize) -> CuratedSet {
    let mut iter = ranked.into_iter();
    let core: Vec<Candidate> = (&mut iter).take(core_size).collect();
    let mut extended: Vec<Candidate> = iter.take(extended_size).collect();

    let mut core = core;
    let mut total_tokens: usize = core.iter().map(token_count).sum::<usize>() + extended.iter().map(token_count).sum::<usize>();

    while total_tokens > token_budget && !extended.is_empty() {
        let evicted = extended.pop().expect("checked non-empty");
        total_tokens -= token_count(&evicted);
    }
    while total_tokens > token_budget && core.len() > 1 {
        let evicted = core.pop().expect("checked len > 1");
        total_tokens -= token_count(&evicted);
    }

    debug!(
        core = core.len(),
        extended = extended.len(),
        total_tokens,
        token_budget,
        "COMPRESS/CURATE"
    );
    CuratedSet { core, extended }
}

/// Demote (not remove) candidates that fail verification within a
/// window — used by the two-stage verification step (§4.5.4). Passing
/// candidates keep their relative order ahead of failing ones inside
/// the window; candidates outside the window are untouched.
#[must_use]
pub fn demote_failed_in_window(mut ranked: Vec<Candidate>, window: usize) -> Vec<Candidate> {
    let window = window.min(ranked.len());
    let rest = ranked.split_off(window);
    let (mut passed, mut failed): (Vec<Candidate>, Vec<Candidate>) =
        ranked.into_iter().partition(|c| c.verified != Some(false));
    passed.append(&mut failed);
    passed.extend(rest);
    passed
}

/// Surface forms mentioned by a chunk, used to cross-check verification
/// without re-running the extractor (chunk text is re-scanned by the
/// caller's extractor before calling this; kept here only as the
/// dedup/lookup glue).
#[must_use]
pub fn known_entity_surfaces(entities: &[String]) -> HashSet<String> {
    entities.iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hippocore_core::types::{ChunkMetadata, Layer};
    use uuid::Uuid;

    fn chunk(text: &str, verified: bool, stage: Stage) -> Chunk {
        let mut metadata = ChunkMetadata::new("notes/a.md", 0);
        metadata.verified = verified;
        metadata.stage = stage;
        metadata.layer = Layer::ShortTerm;
        Chunk {
            chunk_id: Uuid::new_v4(),
            text: text.to_string(),
            embedding: None,
            content_hash: String::new(),
            metadata,
        }
    }

    #[test]
    fn filter_drops_archived_unless_historical() {
        let candidates = vec![
            Candidate::new(chunk("a", true, Stage::Active), "vector", 0),
            Candidate::new(chunk("b", true, Stage::Archived), "vector", 1),
        ];
        let filtered = filter(candidates.clone(), false, false);
        assert_eq!(filtered.len(), 1);

        let kept = filter(candidates, true, false);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn filter_requires_verified_when_mode_demands_it() {
        let candidates = vec![
            Candidate::new(chunk("a", true, Stage::Active), "vector", 0),
            Candidate::new(chunk("b", false, Stage::Active), "vector", 1),
        ];
        let filtered = filter(candidates, false, true);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].chunk.text, "a");
    }

    #[test]
    fn deduplicate_merges_tier_ranks_for_identical_text() {
        let mut c1 = Candidate::new(chunk("same text here", true, Stage::Active), "vector", 3);
        let mut c2 = c1.clone();
        c2.chunk.chunk_id = c1.chunk.chunk_id;
        c2.tier_ranks.clear();
        c2.tier_ranks.insert("graph".to_string(), 1);
        c1.tier_ranks.insert("vector".to_string(), 3);

        let deduped = deduplicate(vec![c1, c2]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].tier_ranks.get("vector"), Some(&3));
        assert_eq!(deduped[0].tier_ranks.get("graph"), Some(&1));
    }

    #[test]
    fn rank_fusion_prefers_candidate_present_in_more_tiers() {
        let mut a = Candidate::new(chunk("a", true, Stage::Active), "vector", 0);
        a.tier_ranks.insert("graph".to_string(), 0);
        let b = Candidate::new(chunk("b", true, Stage::Active), "vector", 0);

        let ranked = rank_fusion(vec![b, a]);
        assert_eq!(ranked[0].chunk.text, "a");
        assert!(ranked[0].fusion_score > ranked[1].fusion_score);
    }

    #[test]
    fn rank_fusion_applies_stage_multiplier_to_demoted_chunks() {
        let fresh = Candidate::new(chunk("fresh", true, Stage::Active), "vector", 0);
        let stale = Candidate::new(chunk("stale", true, Stage::Demoted), "vector", 0);

        let ranked = rank_fusion(vec![stale, fresh]);
        assert_eq!(ranked[0].chunk.text, "fresh");
        let raw = 1.0 / 60.0;
        assert!((ranked[0].fusion_score - raw).abs() < 1e-6);
        assert!((ranked[1].fusion_score - raw * 0.7).abs() < 1e-6);
    }

    #[test]
    fn compress_curate_splits_core_and_extended() {
        let ranked: Vec<Candidate> = (0..5)
            .map(|i| Candidate::new(chunk(&format!("chunk {i}"), true, Stage::Active), "vector", i))
            .collect();
        let curated = compress_curate(ranked, 2, 2, 1_000_000);
        assert_eq!(curated.core.len(), 2);
        assert_eq!(curated.extended.len(), 2);
    }

    #[test]
    fn compress_curate_never_evicts_the_last_core_member() {
        let huge_text = "x".repeat(10_000);
        let ranked = vec![Candidate::new(chunk(&huge_text, true, Stage::Active), "vector", 0)];
        let curated = compress_curate(ranked, 1, 0, 1);
        assert_eq!(curated.core.len(), 1);
    }

    #[test]
    fn demote_failed_in_window_moves_failures_after_passes_within_window() {
        let mut a = Candidate::new(chunk("a", true, Stage::Active), "vector", 0);
        a.verified = Some(false);
        let mut b = Candidate::new(chunk("b", true, Stage::Active), "vector", 1);
        b.verified = Some(true);
        let ranked = demote_failed_in_window(vec![a, b], 2);
        assert_eq!(ranked[0].chunk.text, "b");
        assert_eq!(ranked[1].chunk.text, "a");
    }

    #[test]
    fn demote_failed_in_window_leaves_outside_window_untouched() {
        let mut a = Candidate::new(chunk("a", true, Stage::Active), "vector", 0);
        a.verified = Some(false);
        let c = Candidate::new(chunk("c", true, Stage::Active), "vector", 2);
        let ranked = demote_failed_in_window(vec![a, c], 1);
        assert_eq!(ranked[1].chunk.text, "c");
    }

    #[test]
    fn normalize_text_collapses_whitespace_and_case() {
        assert_eq!(normalize_text("  Foo   Bar "), "foo bar");
    }
}
