//! `EngineHandle`: the top-level orchestrator wiring every collaborator
//! together behind the six dispatcher operations (§4.8, §6).
//!
//! Grounded on `llmspell-memory::manager::DefaultMemoryManager`'s
//! handle-wiring shape: one struct owning every capability as an `Arc`,
//! constructed once from an `EngineConfig`, exposing a thin method per
//! external operation rather than letting callers reach into the
//! collaborators directly.

use chrono::Utc;
use hippocore_context::mode::ModeDetector;
use hippocore_context::pipeline;
use hippocore_context::RetrievalCore;
use hippocore_core::config::EngineConfig;
use hippocore_core::text::normalize_entity_surface;
use hippocore_core::traits::{Embedder, EntityExtractor, GraphIndex, MetadataFilter, VectorIndex};
use hippocore_core::types::{
    Chunk, ChunkMetadata, EdgeType, Entity, EntityType, ModeProfile, Stage, Tags, Verification,
};
use hippocore_graph::extraction::RegexExtractor;
use hippocore_graph::InMemoryGraph;
use hippocore_memory::chunker::Document;
use hippocore_memory::config::HnswIndexConfig;
use hippocore_memory::lifecycle::FilesystemSourceReader;
use hippocore_memory::{Chunker, HnswVectorIndex, LifecycleManager, ReferenceEmbedder};
use hippocore_trace::TraceStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{Result, ServerError};

fn parse_stage(name: &str) -> Option<Stage> {
    match name {
        "active" => Some(Stage::Active),
        "demoted" => Some(Stage::Demoted),
        "archived" => Some(Stage::Archived),
        "rehydratable" => Some(Stage::Rehydratable),
        _ => None,
    }
}

fn parse_edge_types(names: &[String]) -> Vec<EdgeType> {
    names
        .iter()
        .filter_map(|n| match n.as_str() {
            "mentions" => Some(EdgeType::Mentions),
            "co_occurs_with" => Some(EdgeType::CoOccursWith),
            "similar_to" => Some(EdgeType::SimilarTo),
            "related_to" => Some(EdgeType::RelatedTo),
            _ => None,
        })
        .collect()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MemoryStoreMetadata {
    pub source_path: Option<String>,
    pub project: Option<String>,
    pub why: Option<String>,
    pub who: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryStoreArgs {
    pub text: String,
    #[serde(default)]
    pub metadata: MemoryStoreMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryStoreResult {
    pub chunk_ids: Vec<Uuid>,
    pub chunks_indexed: usize,
    pub entities_extracted: usize,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct VectorSearchFilter {
    pub stages: Option<Vec<String>>,
    #[serde(default)]
    pub require_verified: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VectorSearchArgs {
    pub query: String,
    pub limit: Option<usize>,
    pub mode: Option<String>,
    #[serde(default)]
    pub filter: Option<VectorSearchFilter>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkSummary {
    pub chunk_id: Uuid,
    pub text: String,
    pub score: f32,
    pub stage: Stage,
    pub source_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VectorSearchResult {
    pub results: Vec<ChunkSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphQueryArgs {
    pub entities: Vec<String>,
    pub max_hops: Option<usize>,
    #[serde(default)]
    pub edge_types: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReachedNodeSummary {
    pub entity_id: String,
    pub distance: usize,
    pub path: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphQueryResult {
    pub seed: String,
    pub reached: Vec<ReachedNodeSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntityExtractionArgs {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractedEntitySummary {
    pub surface: String,
    pub entity_type: EntityType,
    pub span: (usize, usize),
}

#[derive(Debug, Clone, Deserialize)]
pub struct HipporagRetrieveArgs {
    pub query: String,
    pub limit: Option<usize>,
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HipporagRetrieveResult {
    pub core: Vec<ChunkSummary>,
    pub extended: Vec<ChunkSummary>,
    pub mode: String,
    pub mode_confidence: f32,
    pub trace_id: Uuid,
    pub routing: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectModeArgs {
    pub query: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectModeResult {
    pub mode: String,
    pub confidence: f32,
}

fn chunk_summary(chunk: Chunk, score: f32) -> ChunkSummary {
    ChunkSummary {
        chunk_id: chunk.chunk_id,
        text: chunk.text,
        score,
        stage: chunk.metadata.stage,
        source_path: chunk.metadata.source_path,
    }
}

/// Owns every capability trait implementation plus the pipeline and
/// trace store, and is the sole construction point for all of them
/// (§4.8). Shared behind an `Arc` across concurrent dispatcher calls.
pub struct EngineHandle {
    embedder: Arc<ReferenceEmbedder>,
    vector_index: Arc<HnswVectorIndex>,
    graph_index: Arc<InMemoryGraph>,
    entity_extractor: Arc<RegexExtractor>,
    chunker: Chunker,
    core: RetrievalCore,
    mode_detector: ModeDetector,
    lifecycle: Arc<LifecycleManager>,
    trace_store: TraceStore,
    lifecycle_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl EngineHandle {
    /// Construct every collaborator from `config` and open (or create)
    /// the persisted state under `config.data_dir` (§6 persisted state
    /// layout).
    pub async fn open(config: EngineConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;

        let vector_index = Arc::new(HnswVectorIndex::open(HnswIndexConfig::default(), config.data_dir.join("vectors"))?);
        let graph_index = Arc::new(InMemoryGraph::open(config.data_dir.join("graph.snapshot"))?);
        let embedder = Arc::new(ReferenceEmbedder::new());
        let entity_extractor = Arc::new(RegexExtractor::default());
        let chunker = Chunker::default();

        let lifecycle = Arc::new(
            LifecycleManager::new(
                Arc::clone(&vector_index),
                Arc::clone(&embedder) as Arc<dyn Embedder>,
                config.retention.clone(),
                Duration::from_secs(config.lifecycle_sweep_interval_hours * 3600),
            )
            .with_source_reader(Arc::new(FilesystemSourceReader::new(config.data_dir.clone()))),
        );

        let core = RetrievalCore::new(
            Arc::clone(&embedder) as Arc<dyn Embedder>,
            Arc::clone(&vector_index) as Arc<dyn VectorIndex>,
            Arc::clone(&graph_index) as Arc<dyn GraphIndex>,
            Arc::clone(&entity_extractor) as Arc<dyn EntityExtractor>,
            config.ppr.clone(),
        )
        .with_lifecycle(Arc::clone(&lifecycle));

        let trace_store = TraceStore::open(&config.data_dir).await?;

        let lifecycle_task = Arc::clone(&lifecycle).start();

        info!(data_dir = %config.data_dir.display(), "engine handle constructed");

        Ok(Self {
            embedder,
            vector_index,
            graph_index,
            entity_extractor,
            chunker,
            core,
            mode_detector: ModeDetector::default(),
            lifecycle,
            trace_store,
            lifecycle_task: std::sync::Mutex::new(Some(lifecycle_task)),
        })
    }

    /// Stop the background lifecycle sweep. Idempotent.
    pub async fn shutdown(&self) -> Result<()> {
        self.lifecycle.stop()?;
        if let Some(handle) = self.lifecycle_task.lock().expect("lifecycle task mutex poisoned").take() {
            handle.abort();
        }
        Ok(())
    }

    /// Chunk, embed, and index a new piece of text (§6 `memory_store`).
    /// Transactional: on graph-indexing failure the just-inserted chunks
    /// are rolled back out of the vector index (§7 propagation policy).
    pub async fn memory_store(&self, args: MemoryStoreArgs) -> Result<MemoryStoreResult> {
        if args.text.trim().is_empty() {
            return Err(ServerError::InvalidArguments("text must not be empty".to_string()));
        }

        let source_path = args
            .metadata
            .source_path
            .clone()
            .unwrap_or_else(|| format!("memory_store/{}", Uuid::new_v4()));
        let document = Document { path: &source_path, text: &args.text };
        let (drafts, diagnostics) = self.chunker.chunk(&document);
        for diagnostic in &diagnostics {
            warn!(source_path = %source_path, %diagnostic, "chunking diagnostic");
        }
        if drafts.is_empty() {
            return Err(ServerError::InvalidArguments(format!(
                "no chunks produced from input text ({source_path})"
            )));
        }

        let texts: Vec<String> = drafts.iter().map(|d| d.text.clone()).collect();
        let embeddings = self.embedder.encode(&texts).await.map_err(ServerError::Core)?;

        let now = Utc::now();
        let who = args.metadata.who.clone().unwrap_or_else(|| "unknown".to_string());
        let tags = Tags {
            who: Some(who),
            when_iso: Some(now.to_rfc3339()),
            when_epoch: Some(now.timestamp()),
            project: args.metadata.project.clone(),
            why: Some(args.metadata.why.clone().unwrap_or_else(|| "unspecified".to_string())),
        };

        let mut chunks = Vec::with_capacity(drafts.len());
        for (draft, embedding) in drafts.into_iter().zip(embeddings.into_iter()) {
            let mut metadata = ChunkMetadata::new(draft.source_path.clone(), draft.chunk_index);
            metadata.tags = tags.clone();
            metadata.category = args.metadata.category.clone();
            metadata.kind = draft.kind;
            chunks.push(Chunk {
                chunk_id: draft.chunk_id,
                text: draft.text,
                embedding: Some(embedding),
                content_hash: draft.content_hash,
                metadata,
            });
        }

        let chunk_ids: Vec<Uuid> = chunks.iter().map(|c| c.chunk_id).collect();
        self.vector_index.upsert(chunks.clone()).await.map_err(ServerError::Core)?;

        match self.index_entities(&chunks).await {
            Ok(entities_extracted) => Ok(MemoryStoreResult {
                chunk_ids: chunk_ids.clone(),
                chunks_indexed: chunk_ids.len(),
                entities_extracted,
            }),
            Err(e) => {
                if let Err(rollback_err) = self.vector_index.delete(&chunk_ids).await {
                    error!(error = %rollback_err, "failed to roll back vector upsert after graph indexing failure");
                }
                Err(e)
            }
        }
    }

    /// Register chunk nodes, entity nodes, `Mentions` edges, and
    /// symmetric `CoOccursWith` edges between every pair of distinct
    /// entities extracted from the same chunk (the `CoOccursWith`
    /// variant's own doc comment in `hippocore_core::types` names this
    /// convention).
    async fn index_entities(&self, chunks: &[Chunk]) -> Result<usize> {
        let mut total = 0usize;
        for chunk in chunks {
            self.graph_index.add_chunk_node(chunk.chunk_id).await.map_err(ServerError::Core)?;
            let extracted = self.entity_extractor.extract(&chunk.text);
            let mut seen_in_chunk = Vec::with_capacity(extracted.len());
            for entity in &extracted {
                let entity_id = normalize_entity_surface(&entity.surface);
                self.graph_index
                    .add_entity(Entity::new(entity_id.clone(), entity.surface.clone(), entity.entity_type))
                    .await
                    .map_err(ServerError::Core)?;
                self.graph_index
                    .add_edge(&chunk.chunk_id.to_string(), &entity_id, EdgeType::Mentions, 1.0, 1.0)
                    .await
                    .map_err(ServerError::Core)?;
                if !seen_in_chunk.contains(&entity_id) {
                    seen_in_chunk.push(entity_id);
                }
                total += 1;
            }
            for i in 0..seen_in_chunk.len() {
                for j in (i + 1)..seen_in_chunk.len() {
                    self.graph_index
                        .add_edge(&seen_in_chunk[i], &seen_in_chunk[j], EdgeType::CoOccursWith, 1.0, 1.0)
                        .await
                        .map_err(ServerError::Core)?;
                    self.graph_index
                        .add_edge(&seen_in_chunk[j], &seen_in_chunk[i], EdgeType::CoOccursWith, 1.0, 1.0)
                        .await
                        .map_err(ServerError::Core)?;
                }
            }
        }
        Ok(total)
    }

    /// Pure vector retrieval with mode adaptation (§6 `vector_search`).
    /// Reuses the same filter/deduplicate/rank-fusion pipeline steps
    /// `RetrievalCore::retrieve` uses for its vector tier, since this
    /// tool is a narrower, single-tier entry point into the same
    /// candidate-shaping logic rather than a separate implementation.
    pub async fn vector_search(&self, args: VectorSearchArgs) -> Result<VectorSearchResult> {
        if args.query.trim().is_empty() {
            return Err(ServerError::InvalidArguments("query must not be empty".to_string()));
        }
        let mode = args
            .mode
            .as_deref()
            .and_then(ModeProfile::by_name)
            .unwrap_or_else(ModeProfile::execution);
        let limit = args.limit.unwrap_or(mode.core_size.max(1));

        let query_vector = self.embedder.encode_single(&args.query).await.map_err(ServerError::Core)?;

        let filter = args.filter.map(|f| MetadataFilter {
            stages: f.stages.map(|names| names.iter().filter_map(|s| parse_stage(s)).collect()),
            require_verified: f.require_verified,
        });

        let hits = self
            .vector_index
            .search(&query_vector, limit * 3, filter.as_ref())
            .await
            .map_err(ServerError::Core)?;

        let mut candidates = Vec::with_capacity(hits.len());
        for hit in hits {
            if let Some(chunk) = self.vector_index.get(hit.chunk_id).await.map_err(ServerError::Core)? {
                let rank = candidates.len();
                candidates.push(pipeline::Candidate::new(chunk, "vector", rank));
            }
        }

        let require_verified = mode.verification == Verification::On;
        let filtered = pipeline::filter(candidates, false, require_verified);
        let deduped = pipeline::deduplicate(filtered);
        let ranked = pipeline::rank_fusion(deduped);

        let results = ranked
            .into_iter()
            .take(limit)
            .map(|c| chunk_summary(c.chunk, c.fusion_score))
            .collect();

        Ok(VectorSearchResult { results })
    }

    /// Multi-hop neighborhood via BFS for each seed entity (§6
    /// `graph_query`).
    pub async fn graph_query(&self, args: GraphQueryArgs) -> Result<Vec<GraphQueryResult>> {
        if args.entities.is_empty() {
            return Err(ServerError::InvalidArguments("entities must not be empty".to_string()));
        }
        let max_hops = args.max_hops.unwrap_or(2).clamp(1, 5);
        let edge_types = parse_edge_types(args.edge_types.as_deref().unwrap_or(&[]));

        let mut results = Vec::with_capacity(args.entities.len());
        for surface in &args.entities {
            let entity_id = normalize_entity_surface(surface);
            let reached = self
                .graph_index
                .neighbors(&entity_id, max_hops, &edge_types)
                .await
                .map_err(ServerError::Core)?;
            results.push(GraphQueryResult {
                seed: entity_id,
                reached: reached
                    .into_iter()
                    .map(|n| ReachedNodeSummary { entity_id: n.entity_id, distance: n.distance, path: n.path })
                    .collect(),
            });
        }
        Ok(results)
    }

    /// Run the entity extractor over raw text (§6 `entity_extraction`).
    pub fn entity_extraction(&self, args: EntityExtractionArgs) -> Result<Vec<ExtractedEntitySummary>> {
        if args.text.trim().is_empty() {
            return Err(ServerError::InvalidArguments("text must not be empty".to_string()));
        }
        Ok(self
            .entity_extractor
            .extract(&args.text)
            .into_iter()
            .map(|e| ExtractedEntitySummary { surface: e.surface, entity_type: e.entity_type, span: e.span })
            .collect())
    }

    /// Full pipeline: entity extraction -> PPR -> chunk ranking (§6
    /// `hipporag_retrieve`). Persists the resulting trace, attributed
    /// where mechanically possible, so it can later be replayed (§4.7).
    pub async fn hipporag_retrieve(&self, args: HipporagRetrieveArgs) -> Result<HipporagRetrieveResult> {
        if args.query.trim().is_empty() {
            return Err(ServerError::InvalidArguments("query must not be empty".to_string()));
        }

        let (response, mut trace) = self.core.retrieve(&args.query, None, args.mode.as_deref()).await?;

        let attribution = hippocore_trace::attribution::attribute(&trace, self.vector_index.as_ref()).await?;
        if let Some(attribution) = &attribution {
            trace.error_type = Some(attribution.error_type);
        }
        if let Err(e) = self.trace_store.record(&trace, attribution.as_ref()).await {
            error!(query_id = %trace.query_id, error = %e, "failed to persist query trace");
        }

        let limit = args.limit.unwrap_or(usize::MAX);
        let mut core_chunks: Vec<ChunkSummary> = response
            .core
            .into_iter()
            .map(|c| {
                let stage = c.metadata.stage;
                chunk_summary(c, stage.fusion_multiplier())
            })
            .collect();
        core_chunks.truncate(limit);

        Ok(HipporagRetrieveResult {
            core: core_chunks,
            extended: response
                .extended
                .into_iter()
                .map(|c| {
                    let stage = c.metadata.stage;
                    chunk_summary(c, stage.fusion_multiplier())
                })
                .collect(),
            mode: response.mode,
            mode_confidence: response.mode_confidence,
            trace_id: response.trace_id,
            routing: response.routing,
        })
    }

    /// Return `(mode_name, confidence)` for a query without running the
    /// full retrieval pipeline (§6 `detect_mode`).
    pub fn detect_mode(&self, args: DetectModeArgs) -> Result<DetectModeResult> {
        if args.query.trim().is_empty() {
            return Err(ServerError::InvalidArguments("query must not be empty".to_string()));
        }
        let (mode, confidence) = self.mode_detector.detect(&args.query, None);
        Ok(DetectModeResult { mode: mode.name, confidence })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn test_engine() -> (EngineHandle, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = EngineConfig::for_testing(dir.path());
        let engine = EngineHandle::open(config).await.unwrap();
        (engine, dir)
    }

    #[tokio::test]
    async fn memory_store_round_trips_into_vector_search() {
        let (engine, _dir) = test_engine().await;
        let result = engine
            .memory_store(MemoryStoreArgs {
                text: "Rust is a systems programming language with memory safety guarantees. \
                       Alice works on the Rust compiler team."
                    .repeat(4),
                metadata: MemoryStoreMetadata::default(),
            })
            .await
            .unwrap();
        assert!(result.chunks_indexed >= 1);

        let found = engine
            .vector_search(VectorSearchArgs { query: "memory safety".to_string(), limit: Some(5), mode: None, filter: None })
            .await
            .unwrap();
        assert!(!found.results.is_empty());
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn memory_store_rejects_empty_text() {
        let (engine, _dir) = test_engine().await;
        let result = engine
            .memory_store(MemoryStoreArgs { text: String::new(), metadata: MemoryStoreMetadata::default() })
            .await;
        assert!(result.is_err());
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn entity_extraction_runs_synchronously_over_raw_text() {
        let (engine, _dir) = test_engine().await;
        let entities = engine
            .entity_extraction(EntityExtractionArgs { text: "Alice met Bob in Paris.".to_string() })
            .unwrap();
        assert!(!entities.is_empty());
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn detect_mode_defaults_to_execution_for_an_ambiguous_query() {
        let (engine, _dir) = test_engine().await;
        let result = engine.detect_mode(DetectModeArgs { query: "fix the failing test".to_string() }).unwrap();
        assert_eq!(result.mode, "execution");
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn hipporag_retrieve_answers_a_stored_query() {
        let (engine, _dir) = test_engine().await;
        engine
            .memory_store(MemoryStoreArgs {
                text: "The deployment pipeline failed because the config service timed out.".repeat(4),
                metadata: MemoryStoreMetadata::default(),
            })
            .await
            .unwrap();

        let result = engine
            .hipporag_retrieve(HipporagRetrieveArgs { query: "why did the deployment fail".to_string(), limit: None, mode: None })
            .await
            .unwrap();
        assert!(!result.core.is_empty() || !result.extended.is_empty());
        engine.shutdown().await.unwrap();
    }
}
