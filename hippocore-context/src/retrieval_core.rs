//! C5: `RetrievalCore`, the orchestrator (§4.5).
//!
//! Grounded on `llmspell-context::retrieval::hybrid_rag_memory`'s
//! parallel multi-tier query + graceful degradation shape: spawn one
//! task per selected tier, race them against a shared deadline, and
//! fall back to whatever tiers actually answered rather than failing
//! the whole query when a non-essential tier is slow or down. The
//! teacher's weighted-combine step is replaced wholesale by the
//! pipeline's literal RRF (`crate::pipeline::rank_fusion`).

use crate::error::{ContextError, Result};
use crate::mode::ModeDetector;
use crate::pipeline::{self, Candidate};
use crate::routing::{self, Tier};
use crate::types::RetrievalResponse;
use hippocore_core::text::normalize_entity_surface;
use hippocore_core::traits::{Embedder, EntityExtractor, GraphIndex, VectorIndex};
use hippocore_core::types::{ErrorType, ModeProfile, QueryTrace, RetrievedChunkRef, Verification};
use hippocore_memory::LifecycleManager;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Threshold τ for `planning` mode's conditional verification (§4.5.4).
const VERIFICATION_TAU: f32 = 0.3;

/// Candidates beyond this rank are never verified, regardless of mode
/// (§4.5.4: "Stage A (recall): top-20 candidates from fusion").
const VERIFICATION_WINDOW: usize = 20;

static HISTORICAL_PATTERN: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(?i)\bhistor(?:y|ical)\b|\bused\s+to\b|\bpreviously\b|\bin\s+the\s+past\b|\bback\s+then\b|\bold\s+notes?\b")
        .unwrap()
});

/// A query is "historical" (§4.5.3 FILTER step) when it explicitly asks
/// about the past rather than the present; this is the one routing
/// input the spec leaves to the implementer to define (SPEC_FULL.md
/// §9a resolution 5).
#[must_use]
fn is_historical_query(query: &str) -> bool {
    HISTORICAL_PATTERN.is_match(query)
}

/// Snapshot of one tier's RECALL outcome.
enum TierOutcome {
    Completed(Vec<Candidate>),
    Failed(String),
    TimedOut,
}

/// Wires together the capability traits and the pure pipeline steps
/// into one `retrieve()` call per query (§4.5). Constructed once per
/// engine instance and shared behind an `Arc` across concurrent
/// queries — every method takes `&self`.
pub struct RetrievalCore {
    embedder: Arc<dyn Embedder>,
    vector_index: Arc<dyn VectorIndex>,
    graph_index: Arc<dyn GraphIndex>,
    entity_extractor: Arc<dyn EntityExtractor>,
    /// Optional: a standalone `RetrievalCore` (e.g. under test, against
    /// a fixture with no lifecycle sweep) can omit access accounting.
    lifecycle: Option<Arc<LifecycleManager>>,
    mode_detector: ModeDetector,
    ppr_alpha: f32,
    ppr_max_iter: usize,
    ppr_tol: f32,
    /// Used only to derive a per-process-unique `query_id` prefix; not
    /// a correctness requirement, just avoids relying on wall-clock
    /// entropy for trace ids in rapid succession.
    query_counter: AtomicU64,
}

impl RetrievalCore {
    #[must_use]
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vector_index: Arc<dyn VectorIndex>,
        graph_index: Arc<dyn GraphIndex>,
        entity_extractor: Arc<dyn EntityExtractor>,
        ppr: hippocore_core::config::PprConfig,
    ) -> Self {
        Self {
            embedder,
            vector_index,
            graph_index,
            entity_extractor,
            lifecycle: None,
            mode_detector: ModeDetector::default(),
            ppr_alpha: ppr.alpha,
            ppr_max_iter: ppr.max_iter,
            ppr_tol: ppr.tol,
            query_counter: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_lifecycle(mut self, lifecycle: Arc<LifecycleManager>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    #[must_use]
    pub fn with_mode_detector(mut self, detector: ModeDetector) -> Self {
        self.mode_detector = detector;
        self
    }

    /// Run the full pipeline for one query (§4.5). Returns the response
    /// alongside the trace that was produced while answering it; the
    /// trace is not persisted here — ownership of trace storage belongs
    /// exclusively to `hippocore-trace`'s `TraceStore` (§4.7, §9).
    pub async fn retrieve(
        &self,
        query: &str,
        user_context: Option<&str>,
        mode_override: Option<&str>,
    ) -> Result<(RetrievalResponse, QueryTrace)> {
        let start = Instant::now();
        let query_id = self.next_query_id();
        let mut phase_latencies_ms: HashMap<String, u64> = HashMap::new();

        if query.trim().is_empty() {
            return Err(ContextError::InvalidQuery("query must not be empty".to_string()));
        }

        // Mode detection never fails outright (§4.5.5: "mode detection
        // returns nothing -> default to execution at confidence 0.3");
        // `ModeDetector::detect` already implements that fallback.
        let phase_start = Instant::now();
        let (mode, mode_confidence) = self.mode_detector.detect(query, mode_override);
        phase_latencies_ms.insert("mode_detection".to_string(), elapsed_ms(phase_start));

        let extracted_entities = self.entity_extractor.extract(query);
        let query_entity_ids: Vec<String> = extracted_entities
            .iter()
            .map(|e| normalize_entity_surface(&e.surface))
            .collect();
        let mut known_entity_ids = Vec::new();
        for entity_id in &query_entity_ids {
            if self.graph_index.get_entity(entity_id).await?.is_some() {
                known_entity_ids.push(entity_id.clone());
            }
        }

        let decision = routing::route(query, &mode, mode_confidence, !known_entity_ids.is_empty());
        let is_historical = is_historical_query(query);

        let deadline = Instant::now() + Duration::from_millis(mode.latency_budget_ms * 2);
        let phase_start = Instant::now();
        let recall = self.recall(query, &mode, &decision, &known_entity_ids, deadline).await?;
        phase_latencies_ms.insert("recall".to_string(), elapsed_ms(phase_start));

        let mut routing_log = decision.routing_log.clone();
        if recall.graph_degraded {
            routing_log.push_str("_graph_unavailable");
        }

        let phase_start = Instant::now();
        let require_verified = mode.verification == Verification::On;
        let filtered = pipeline::filter(recall.candidates, is_historical, require_verified);
        phase_latencies_ms.insert("filter".to_string(), elapsed_ms(phase_start));

        let phase_start = Instant::now();
        let deduped = pipeline::deduplicate(filtered);
        phase_latencies_ms.insert("deduplicate".to_string(), elapsed_ms(phase_start));

        let phase_start = Instant::now();
        let mut ranked = pipeline::rank_fusion(deduped);
        phase_latencies_ms.insert("rank".to_string(), elapsed_ms(phase_start));

        let phase_start = Instant::now();
        let should_verify = match mode.verification {
            Verification::On => true,
            Verification::Conditional => ranked.first().is_some_and(|c| c.fusion_score < VERIFICATION_TAU),
            Verification::Off => false,
        };
        let mut verification_result = None;
        if should_verify {
            let window = ranked.len().min(VERIFICATION_WINDOW);
            for candidate in ranked.iter_mut().take(window) {
                let passed = self.verify_candidate(candidate).await;
                candidate.verified = Some(passed);
                candidate.chunk.metadata.verified = passed;
            }
            verification_result = Some(ranked.iter().take(window).all(|c| c.verified != Some(false)));
            ranked = pipeline::demote_failed_in_window(ranked, window);
        }
        phase_latencies_ms.insert("verify".to_string(), elapsed_ms(phase_start));

        let phase_start = Instant::now();
        let curated = pipeline::compress_curate(ranked, mode.core_size, mode.extended_size, mode.token_budget);
        phase_latencies_ms.insert("compress_curate".to_string(), elapsed_ms(phase_start));

        let retrieved_chunks: Vec<RetrievedChunkRef> = curated
            .core
            .iter()
            .chain(curated.extended.iter())
            .enumerate()
            .map(|(rank, c)| RetrievedChunkRef {
                chunk_id: c.chunk.chunk_id,
                score: c.fusion_score,
                source_tier: c.tier_ranks.keys().next().cloned().unwrap_or_default(),
                rank,
            })
            .collect();

        self.record_access(&retrieved_chunks).await;

        let total_latency_ms = elapsed_ms(start);
        let error_type = recall.timed_out.then_some(ErrorType::SystemError);
        let error = recall
            .timed_out
            .then(|| "one or more tiers exceeded the latency budget".to_string());

        let trace = QueryTrace {
            query_id,
            timestamp: chrono::Utc::now(),
            query: query.to_string(),
            user_context: user_context.map(str::to_string),
            mode_detected: mode.name.clone(),
            mode_confidence,
            stores_queried: decision.tiers.iter().map(tier_name).map(str::to_string).collect(),
            routing_logic: routing_log.clone(),
            retrieved_chunks,
            phase_latencies_ms,
            verification_result,
            output: None,
            total_latency_ms,
            error,
            error_type,
        };

        let response = RetrievalResponse {
            core: curated.core.into_iter().map(|c| c.chunk).collect(),
            extended: curated.extended.into_iter().map(|c| c.chunk).collect(),
            mode: mode.name,
            mode_confidence,
            trace_id: query_id,
            routing: routing_log,
        };

        info!(
            query_id = %trace.query_id,
            mode = %response.mode,
            core = response.core.len(),
            extended = response.extended.len(),
            total_latency_ms,
            "query answered"
        );

        Ok((response, trace))
    }

    /// Whether `chunk_id` is still present in the vector index — the
    /// authoritative chunk store. Used by `hippocore-trace`'s replay to
    /// decide whether a trace's retrieved chunks can still be
    /// reconstructed (§4.7: "source data deleted" -> `ReplayUnavailable`
    /// rather than a misleading re-run).
    pub async fn chunk_exists(&self, chunk_id: Uuid) -> Result<bool> {
        Ok(self.vector_index.get(chunk_id).await?.is_some())
    }

    fn next_query_id(&self) -> Uuid {
        self.query_counter.fetch_add(1, Ordering::Relaxed);
        Uuid::new_v4()
    }

    /// RECALL (§4.5.3 step 1): query each selected tier in parallel,
    /// racing both against a shared deadline so a slow tier can be
    /// abandoned without losing results already produced by the other.
    async fn recall(
        &self,
        query: &str,
        mode: &ModeProfile,
        decision: &routing::RoutingDecision,
        known_entity_ids: &[String],
        deadline: Instant,
    ) -> Result<RecallOutcome> {
        let want = (mode.core_size + mode.extended_size).max(1) * 3;

        let vector_future = decision.tiers.contains(&Tier::Vector).then(|| {
            recall_vector_tier(Arc::clone(&self.embedder), Arc::clone(&self.vector_index), query.to_string(), want)
        });
        let graph_future = (decision.tiers.contains(&Tier::Graph) || decision.tiers.contains(&Tier::GraphMultiHop)).then(|| {
            recall_graph_tier(
                Arc::clone(&self.graph_index),
                Arc::clone(&self.vector_index),
                known_entity_ids.to_vec(),
                want,
                decision.tiers.contains(&Tier::GraphMultiHop),
                self.ppr_alpha,
                self.ppr_max_iter,
                self.ppr_tol,
            )
        });

        let vector_outcome = match vector_future {
            Some(fut) => await_tier(fut, deadline).await,
            None => TierOutcome::Completed(Vec::new()),
        };
        let graph_outcome = match graph_future {
            Some(fut) => await_tier(fut, deadline).await,
            None => TierOutcome::Completed(Vec::new()),
        };

        // Vector tier failing is fatal: it is the only tier guaranteed
        // to be populated for every chunk (§4.5.5 "cannot proceed").
        let mut timed_out = false;
        let mut candidates = match vector_outcome {
            TierOutcome::Completed(c) => c,
            TierOutcome::Failed(msg) => return Err(ContextError::VectorTierFailed(msg)),
            TierOutcome::TimedOut => {
                warn!("vector tier exceeded latency budget, proceeding with whatever else completed");
                timed_out = true;
                Vec::new()
            }
        };
        let mut graph_degraded = false;
        match graph_outcome {
            TierOutcome::Completed(c) => candidates.extend(c),
            TierOutcome::Failed(msg) => {
                warn!(error = %msg, "graph tier failed, degrading to vector-only");
                graph_degraded = true;
            }
            TierOutcome::TimedOut => {
                warn!("graph tier exceeded latency budget, dropping its results");
                timed_out = true;
            }
        }
        Ok(RecallOutcome {
            candidates,
            graph_degraded,
            timed_out,
        })
    }

    /// Stage B of two-stage verification (§4.5.4): a candidate passes
    /// if at least one entity mentioned in its text is a known graph
    /// node with at least one outgoing edge (the "ground-truth" signal).
    async fn verify_candidate(&self, candidate: &Candidate) -> bool {
        for extracted in self.entity_extractor.extract(&candidate.chunk.text) {
            let entity_id = normalize_entity_surface(&extracted.surface);
            let Ok(Some(_)) = self.graph_index.get_entity(&entity_id).await else {
                continue;
            };
            if matches!(self.graph_index.edges_from(&entity_id).await, Ok(edges) if !edges.is_empty()) {
                return true;
            }
        }
        false
    }

    /// Buffer-and-flush access accounting for the chunks actually
    /// returned this query (§4.6): one `record_access` call per chunk,
    /// issued concurrently so the response is not held up by it.
    async fn record_access(&self, retrieved: &[RetrievedChunkRef]) {
        let Some(lifecycle) = &self.lifecycle else {
            return;
        };
        let futures = retrieved.iter().map(|r| {
            let lifecycle = Arc::clone(lifecycle);
            let chunk_id = r.chunk_id;
            async move {
                if let Err(e) = lifecycle.record_access(chunk_id).await {
                    warn!(%chunk_id, error = %e, "failed to record access");
                }
            }
        });
        futures::future::join_all(futures).await;
    }
}

struct RecallOutcome {
    candidates: Vec<Candidate>,
    graph_degraded: bool,
    timed_out: bool,
}

/// The vector tier (§4.3): embed the query, search the ANN index, and
/// hydrate each hit into a full [`Candidate`]. A free function (rather
/// than a `&self` method) so the future it returns owns everything it
/// touches and can be spawned with a `'static` bound.
async fn recall_vector_tier(
    embedder: Arc<dyn Embedder>,
    vector_index: Arc<dyn VectorIndex>,
    query: String,
    k: usize,
) -> std::result::Result<Vec<Candidate>, String> {
    let query_vector = embedder.encode_single(&query).await.map_err(|e| e.to_string())?;
    let hits = vector_index.search(&query_vector, k, None).await.map_err(|e| e.to_string())?;
    let mut candidates = Vec::with_capacity(hits.len());
    for (rank, hit) in hits.into_iter().enumerate() {
        if let Some(chunk) = vector_index.get(hit.chunk_id).await.map_err(|e| e.to_string())? {
            candidates.push(Candidate::new(chunk, "vector", rank));
        }
    }
    Ok(candidates)
}

/// The graph tier (§4.4): diffuse PPR from the query's known entity
/// seeds, aggregate into per-chunk scores, and hydrate each ranked
/// chunk id against the vector index (the authoritative chunk store).
#[allow(clippy::too_many_arguments)]
async fn recall_graph_tier(
    graph_index: Arc<dyn GraphIndex>,
    vector_index: Arc<dyn VectorIndex>,
    known_entity_ids: Vec<String>,
    k: usize,
    multi_hop: bool,
    ppr_alpha: f32,
    ppr_max_iter: usize,
    ppr_tol: f32,
) -> std::result::Result<Vec<Candidate>, String> {
    if known_entity_ids.is_empty() {
        return Ok(Vec::new());
    }
    if multi_hop {
        // Discovery only: surfaces entities reachable beyond the
        // immediate neighborhood for trace/observability (§4.4
        // "multi-hop expansion"). Chunk ranking always comes from the
        // PPR diffusion below, which is not hop-bounded.
        for seed in &known_entity_ids {
            match graph_index.neighbors(seed, 3, &[]).await {
                Ok(reached) => debug!(seed, discovered = reached.len(), "multi-hop expansion"),
                Err(e) => debug!(seed, error = %e, "multi-hop expansion failed, continuing with PPR only"),
            }
        }
    }
    let ppr_scores = graph_index
        .personalized_pagerank(&known_entity_ids, ppr_alpha, ppr_max_iter, ppr_tol)
        .await
        .map_err(|e| e.to_string())?;
    if ppr_scores.is_empty() {
        return Ok(Vec::new());
    }
    let ranked_chunks = graph_index.rank_chunks_by_ppr(&ppr_scores, k).await.map_err(|e| e.to_string())?;
    let mut candidates = Vec::with_capacity(ranked_chunks.len());
    for (rank, (chunk_id, _score)) in ranked_chunks.into_iter().enumerate() {
        if let Some(chunk) = vector_index.get(chunk_id).await.map_err(|e| e.to_string())? {
            candidates.push(Candidate::new(chunk, "graph", rank));
        }
    }
    Ok(candidates)
}

fn tier_name(tier: &Tier) -> &'static str {
    match tier {
        Tier::Vector => "vector",
        Tier::Graph => "graph",
        Tier::GraphMultiHop => "graph_multihop",
        Tier::Bayesian => "bayesian",
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

/// Race a tier future against the shared deadline, aborting the
/// underlying task if it is still running when the deadline passes
/// (§4.5.5, §5 cancellation).
async fn await_tier<F>(future: F, deadline: Instant) -> TierOutcome
where
    F: std::future::Future<Output = std::result::Result<Vec<Candidate>, String>> + Send + 'static,
{
    let handle = tokio::spawn(future);
    let abort_handle = handle.abort_handle();
    match tokio::time::timeout_at(deadline, handle).await {
        Ok(Ok(Ok(candidates))) => TierOutcome::Completed(candidates),
        Ok(Ok(Err(message))) => TierOutcome::Failed(message),
        Ok(Err(join_error)) => TierOutcome::Failed(format!("tier task panicked: {join_error}")),
        Err(_elapsed) => {
            abort_handle.abort();
            TierOutcome::TimedOut
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hippocore_core::config::PprConfig;
    use hippocore_core::types::{Chunk, ChunkMetadata, EdgeType, Entity, EntityType, Stage};
    use hippocore_graph::extraction::RegexExtractor;
    use hippocore_graph::InMemoryGraph;
    use hippocore_memory::config::HnswIndexConfig;
    use hippocore_memory::{HnswVectorIndex, ReferenceEmbedder};

    #[test]
    fn historical_query_detection() {
        assert!(is_historical_query("what did we decide previously about this?"));
        assert!(is_historical_query("show me the history of this project"));
        assert!(!is_historical_query("what's happening right now?"));
    }

    fn chunk(text: &str, stage: Stage) -> Chunk {
        let mut metadata = ChunkMetadata::new("notes.md", 0);
        metadata.stage = stage;
        metadata.verified = true;
        Chunk {
            chunk_id: Uuid::new_v4(),
            text: text.to_string(),
            embedding: None,
            content_hash: format!("test-hash-{}", text.len()),
            metadata,
        }
    }

    /// Wires real concrete implementations together the way
    /// `hippocore_memory::lifecycle`'s own tests do, rather than mocking
    /// the capability traits.
    async fn build_core() -> (RetrievalCore, Arc<HnswVectorIndex>, Arc<InMemoryGraph>, Arc<ReferenceEmbedder>) {
        let embedder = Arc::new(ReferenceEmbedder::new());
        let vector_index = Arc::new(HnswVectorIndex::new(HnswIndexConfig::default()));
        let graph_index = Arc::new(InMemoryGraph::new());
        let extractor = Arc::new(RegexExtractor::new());

        let core = RetrievalCore::new(
            Arc::clone(&embedder) as Arc<dyn Embedder>,
            Arc::clone(&vector_index) as Arc<dyn VectorIndex>,
            Arc::clone(&graph_index) as Arc<dyn GraphIndex>,
            extractor as Arc<dyn EntityExtractor>,
            PprConfig::default(),
        );
        (core, vector_index, graph_index, embedder)
    }

    async fn ingest(embedder: &ReferenceEmbedder, vector_index: &HnswVectorIndex, text: &str, stage: Stage) -> Chunk {
        let mut c = chunk(text, stage);
        c.embedding = Some(embedder.encode_single(text).await.unwrap());
        vector_index.upsert(vec![c.clone()]).await.unwrap();
        c
    }

    #[tokio::test]
    async fn retrieve_rejects_empty_query() {
        let (core, _vector_index, _graph_index, _embedder) = build_core().await;
        let err = core.retrieve("   ", None, None).await.unwrap_err();
        assert!(matches!(err, ContextError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn retrieve_returns_vector_hits_in_execution_mode() {
        let (core, vector_index, _graph_index, embedder) = build_core().await;
        ingest(&embedder, &vector_index, "deploy the payments service to production", Stage::Active).await;
        ingest(&embedder, &vector_index, "the weather in paris is mild today", Stage::Active).await;

        let (response, trace) = core.retrieve("deploy the payments service now", None, Some("execution")).await.unwrap();

        assert_eq!(response.mode, "execution");
        assert!(!response.core.is_empty());
        assert_eq!(trace.mode_detected, "execution");
        assert!(trace.phase_latencies_ms.contains_key("recall"));
    }

    #[tokio::test]
    async fn retrieve_empty_index_returns_empty_result_not_an_error() {
        let (core, _vector_index, _graph_index, _embedder) = build_core().await;
        let (response, _trace) = core.retrieve("anything at all", None, Some("execution")).await.unwrap();
        assert!(response.core.is_empty());
        assert!(response.extended.is_empty());
    }

    #[tokio::test]
    async fn retrieve_uses_graph_tier_when_query_names_a_known_entity() {
        let (core, vector_index, graph_index, embedder) = build_core().await;

        let rust_chunk = ingest(&embedder, &vector_index, "Rust is a systems programming language.", Stage::Active).await;
        graph_index.add_chunk_node(rust_chunk.chunk_id).await.unwrap();
        graph_index
            .add_entity(Entity::new("rust", "Rust", EntityType::Concept))
            .await
            .unwrap();
        graph_index.add_edge("rust", "rust", EdgeType::RelatedTo, 1.0, 1.0).await.unwrap();
        graph_index.add_edge(&rust_chunk.chunk_id.to_string(), "rust", EdgeType::Mentions, 1.0, 1.0).await.unwrap();

        let (response, trace) = core.retrieve("tell me about rust and its history", None, Some("planning")).await.unwrap();

        assert!(trace.stores_queried.contains(&"graph".to_string()) || trace.stores_queried.contains(&"vector".to_string()));
        assert_eq!(response.mode, "planning");
    }

    #[tokio::test]
    async fn retrieve_filters_archived_chunks_unless_query_is_historical() {
        let (core, vector_index, _graph_index, embedder) = build_core().await;
        ingest(&embedder, &vector_index, "an old archived note about onboarding", Stage::Archived).await;

        let (present, _) = core
            .retrieve("what's the onboarding history here", None, Some("planning"))
            .await
            .unwrap();
        let (absent, _) = core
            .retrieve("what's the onboarding status here", None, Some("planning"))
            .await
            .unwrap();

        let all = |r: &RetrievalResponse| r.core.iter().chain(r.extended.iter()).count();
        assert!(all(&present) >= all(&absent));
    }
}
