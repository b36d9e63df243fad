//! Core data model: `Chunk`, `Entity`, `Edge`, `ModeProfile`, `QueryTrace`.
//!
//! Mirrors the teacher's convention of a plain-data module with builder
//! methods (`llmspell-graph::types`) rather than a generic property bag —
//! metadata is a closed struct with a small typed extension map for the
//! tagging protocol (`tags.*`), per the design notes' guidance on
//! replacing dynamic metadata dicts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Embedding dimension fixed at 384 for the lifetime of a deployed index.
pub const EMBEDDING_DIM: usize = 384;

/// Retention class input to the `LifecycleManager`'s stage-transition
/// thresholds. See SPEC_FULL.md §9a for how this interacts with `Stage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    ShortTerm,
    MidTerm,
    LongTerm,
}

impl Layer {
    /// Default TTL, in hours, before a chunk in this layer becomes
    /// eligible for its next downward stage transition.
    #[must_use]
    pub const fn default_ttl_hours(self) -> i64 {
        match self {
            Self::ShortTerm => 24,
            Self::MidTerm => 7 * 24,
            Self::LongTerm => 30 * 24,
        }
    }
}

/// A chunk's position in the forgetting/compression state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Active,
    Demoted,
    Archived,
    Rehydratable,
}

impl Stage {
    /// Fusion-score multiplier applied to candidates at this stage
    /// (§4.6).
    #[must_use]
    pub const fn fusion_multiplier(self) -> f32 {
        match self {
            Self::Active => 1.0,
            Self::Demoted => 0.7,
            Self::Archived | Self::Rehydratable => 0.3,
        }
    }
}

/// The tagging protocol applied at `memory_store` (§6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tags {
    pub who: Option<String>,
    pub when_iso: Option<String>,
    pub when_epoch: Option<i64>,
    pub project: Option<String>,
    pub why: Option<String>,
}

/// Recognized metadata fields on a `Chunk`, plus an extension map for
/// anything the tagging protocol or a caller attaches that isn't in the
/// closed set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_path: String,
    pub chunk_index: usize,
    pub stage: Stage,
    pub tags: Tags,
    pub layer: Layer,
    pub category: Option<String>,
    pub verified: bool,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    /// `kind = "frontmatter"` for the frontmatter chunk emitted by the
    /// chunker (§4.1), plus any other extension fields.
    pub kind: Option<String>,
    /// Set when the stage transitions to `archived`/`rehydratable`
    /// (§4.6 invariant).
    pub summary: Option<String>,
    pub summary_generated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

impl ChunkMetadata {
    #[must_use]
    pub fn new(source_path: impl Into<String>, chunk_index: usize) -> Self {
        let now = Utc::now();
        Self {
            source_path: source_path.into(),
            chunk_index,
            stage: Stage::Active,
            tags: Tags::default(),
            layer: Layer::ShortTerm,
            category: None,
            verified: false,
            last_accessed: now,
            access_count: 0,
            kind: None,
            summary: None,
            summary_generated_at: None,
            extra: HashMap::new(),
        }
    }
}

/// The atomic unit of retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: Uuid,
    pub text: String,
    /// Present iff the chunk is indexed in the `VectorIndex` (§3
    /// invariant).
    pub embedding: Option<Vec<f32>>,
    pub content_hash: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Derive a stable 128-bit id from `(source_path, chunk_index,
    /// content_hash)` so duplicate ingestion of identical text is a
    /// no-op at the index level (§8 boundary behavior).
    #[must_use]
    pub fn derive_id(source_path: &str, chunk_index: usize, content_hash: &str) -> Uuid {
        let name = format!("{source_path}:{chunk_index}:{content_hash}");
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
    }
}

/// One of the closed set of entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Project,
    Concept,
    Tag,
    Other,
}

/// A named thing extracted from chunk text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Normalized lowercase underscore-joined surface form.
    pub entity_id: String,
    pub canonical_name: String,
    pub entity_type: EntityType,
    pub first_seen: DateTime<Utc>,
    pub mention_count: u64,
}

impl Entity {
    #[must_use]
    pub fn new(entity_id: impl Into<String>, canonical_name: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            entity_id: entity_id.into(),
            canonical_name: canonical_name.into(),
            entity_type,
            first_seen: Utc::now(),
            mention_count: 1,
        }
    }
}

/// Edge type in the entity/chunk graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    /// chunk → entity
    Mentions,
    /// entity ↔ entity, symmetric pair stored as two edges
    CoOccursWith,
    /// entity → entity, synonymy (origin out of scope, §9)
    SimilarTo,
    /// entity → entity, generic semantic edge
    RelatedTo,
}

/// A directed, typed, weighted relation in the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub edge_type: EdgeType,
    pub weight: f32,
    pub confidence: f32,
}

/// Verification behavior for a `ModeProfile`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verification {
    On,
    Conditional,
    Off,
}

/// The parameters of a detected interaction mode (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeProfile {
    pub name: String,
    pub token_budget: usize,
    pub core_size: usize,
    pub extended_size: usize,
    pub verification: Verification,
    pub latency_budget_ms: u64,
}

impl ModeProfile {
    #[must_use]
    pub fn execution() -> Self {
        Self {
            name: "execution".to_string(),
            token_budget: 5_000,
            core_size: 5,
            extended_size: 0,
            verification: Verification::On,
            latency_budget_ms: 500,
        }
    }

    #[must_use]
    pub fn planning() -> Self {
        Self {
            name: "planning".to_string(),
            token_budget: 10_000,
            core_size: 10,
            extended_size: 5,
            verification: Verification::Conditional,
            latency_budget_ms: 1_000,
        }
    }

    #[must_use]
    pub fn brainstorming() -> Self {
        Self {
            name: "brainstorming".to_string(),
            token_budget: 20_000,
            core_size: 15,
            extended_size: 10,
            verification: Verification::Off,
            latency_budget_ms: 2_000,
        }
    }

    #[must_use]
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "execution" => Some(Self::execution()),
            "planning" => Some(Self::planning()),
            "brainstorming" => Some(Self::brainstorming()),
            _ => None,
        }
    }
}

/// Classification of a failed query, assigned during post-hoc
/// attribution (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    ContextBug,
    ModelBug,
    SystemError,
}

/// One retrieved chunk's position in a trace (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunkRef {
    pub chunk_id: Uuid,
    pub score: f32,
    pub source_tier: String,
    pub rank: usize,
}

/// The full record of one query execution (§3, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryTrace {
    pub query_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub query: String,
    pub user_context: Option<String>,
    pub mode_detected: String,
    pub mode_confidence: f32,
    pub stores_queried: Vec<String>,
    pub routing_logic: String,
    pub retrieved_chunks: Vec<RetrievedChunkRef>,
    /// Per-phase latency in milliseconds, keyed by phase name (RECALL,
    /// FILTER, DEDUPLICATE, RANK, COMPRESS, ...).
    pub phase_latencies_ms: HashMap<String, u64>,
    pub verification_result: Option<bool>,
    pub output: Option<String>,
    pub total_latency_ms: u64,
    pub error: Option<String>,
    pub error_type: Option<ErrorType>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_id_is_deterministic() {
        let a = Chunk::derive_id("notes/a.md", 0, "abc123");
        let b = Chunk::derive_id("notes/a.md", 0, "abc123");
        let c = Chunk::derive_id("notes/a.md", 1, "abc123");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn mode_profiles_match_canonical_values() {
        let exec = ModeProfile::execution();
        assert_eq!(exec.token_budget, 5_000);
        assert_eq!(exec.core_size, 5);
        assert_eq!(exec.extended_size, 0);
        assert_eq!(exec.verification, Verification::On);

        let brainstorm = ModeProfile::brainstorming();
        assert_eq!(brainstorm.core_size, 15);
        assert_eq!(brainstorm.extended_size, 10);
        assert_eq!(brainstorm.verification, Verification::Off);
    }

    #[test]
    fn stage_fusion_multipliers() {
        assert!((Stage::Active.fusion_multiplier() - 1.0).abs() < f32::EPSILON);
        assert!((Stage::Demoted.fusion_multiplier() - 0.7).abs() < f32::EPSILON);
        assert!((Stage::Archived.fusion_multiplier() - 0.3).abs() < f32::EPSILON);
    }
}
