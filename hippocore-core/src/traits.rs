//! Capability traits implemented by the downstream crates.
//!
//! Each collaborator is a named trait rather than a duck-typed optional
//! handle (design notes §9): `RetrievalCore` is constructed with
//! `Arc<dyn Embedder>`, `Arc<dyn VectorIndex>`, `Arc<dyn GraphIndex>` —
//! there is no call site that checks whether a collaborator is present.

use crate::error::Result;
use crate::types::{Chunk, Edge, EdgeType, Entity};
use async_trait::async_trait;
use uuid::Uuid;

/// `(text) -> unit vector` capability (§4.2). An external capability in
/// the sense that this crate does not prescribe *how* a vector is
/// produced, only the contract: deterministic, batched, L2-normalized.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// Batch encode. Empty input yields an empty output (not an error).
    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Convenience wrapper over `encode` for a single string.
    async fn encode_single(&self, text: &str) -> Result<Vec<f32>> {
        let mut batch = self.encode(std::slice::from_ref(&text.to_string())).await?;
        Ok(batch.pop().unwrap_or_default())
    }
}

/// A single vector search hit.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk_id: Uuid,
    pub score: f32,
}

/// Metadata filter applied by `VectorIndex::search` (§4.3). Kept small
/// and closed rather than a generic predicate tree — the only filters
/// the pipeline actually needs.
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    pub stages: Option<Vec<crate::types::Stage>>,
    pub require_verified: bool,
}

/// Vector storage and approximate nearest-neighbor search (§4.3).
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Idempotent on `chunk_id`; atomic per batch.
    async fn upsert(&self, chunks: Vec<Chunk>) -> Result<usize>;

    /// Ordered descending by score, length <= k, ties broken by
    /// `chunk_id` lexicographic order.
    async fn search(
        &self,
        query_vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorHit>>;

    async fn delete(&self, chunk_ids: &[Uuid]) -> Result<usize>;

    async fn get(&self, chunk_id: Uuid) -> Result<Option<Chunk>>;

    async fn count(&self, filter: Option<&MetadataFilter>) -> Result<usize>;
}

/// A node reached during BFS multi-hop expansion (§4.4).
#[derive(Debug, Clone)]
pub struct ReachedNode {
    pub entity_id: String,
    pub distance: usize,
    pub path: Vec<String>,
}

/// Directed labelled graph of entities and chunk nodes (§4.4).
#[async_trait]
pub trait GraphIndex: Send + Sync {
    async fn add_chunk_node(&self, chunk_id: Uuid) -> Result<()>;

    /// Inserts or merges with an existing `entity_id`, incrementing
    /// `mention_count`.
    async fn add_entity(&self, entity: Entity) -> Result<()>;

    /// Duplicates upgrade `(weight, confidence)` by `max`.
    async fn add_edge(&self, from: &str, to: &str, edge_type: EdgeType, weight: f32, confidence: f32) -> Result<()>;

    async fn get_entity(&self, entity_id: &str) -> Result<Option<Entity>>;

    async fn neighbors(
        &self,
        entity_id: &str,
        depth: usize,
        edge_types: &[EdgeType],
    ) -> Result<Vec<ReachedNode>>;

    /// Returns mapping from node id to score, summing to 1.0 over the
    /// reachable subgraph (§4.4). Empty seed set returns an empty map.
    async fn personalized_pagerank(
        &self,
        seed_nodes: &[String],
        alpha: f32,
        max_iter: usize,
        tol: f32,
    ) -> Result<std::collections::HashMap<String, f32>>;

    async fn remove_chunk(&self, chunk_id: Uuid) -> Result<()>;

    async fn edges_from(&self, entity_id: &str) -> Result<Vec<Edge>>;

    /// Reverse lookup for `mentions` edges: every chunk currently
    /// recorded as mentioning `entity_id` (§4.4 chunk aggregation).
    async fn chunks_mentioning(&self, entity_id: &str) -> Result<Vec<Uuid>>;

    /// Aggregate PPR scores of entities mentioned by each chunk into a
    /// per-chunk score, returning the top `top_k` descending by score
    /// with ties broken by `chunk_id` lexicographic order (§4.4). The
    /// full tie-break chain including `last_accessed` is applied one
    /// layer up, in the fusion RANK step, where chunk metadata is
    /// available.
    async fn rank_chunks_by_ppr(
        &self,
        ppr_scores: &std::collections::HashMap<String, f32>,
        top_k: usize,
    ) -> Result<Vec<(Uuid, f32)>>;
}

/// A raw entity mention found in text, prior to graph insertion (§4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedEntity {
    pub surface: String,
    pub entity_type: crate::types::EntityType,
    pub span: (usize, usize),
}

/// `extract(text) -> set of {surface, type, span}` (§4.4).
pub trait EntityExtractor: Send + Sync {
    fn extract(&self, text: &str) -> Vec<ExtractedEntity>;

    /// Deterministic normalizer: lowercase, strip punctuation, collapse
    /// whitespace to underscore. Two surfaces that normalize equal are
    /// the same entity. Delegates to [`crate::text::normalize_entity_surface`]
    /// so the same logic is reachable through a `dyn EntityExtractor`,
    /// which cannot call a `Self: Sized` associated function.
    fn normalize(surface: &str) -> String
    where
        Self: Sized,
    {
        crate::text::normalize_entity_surface(surface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy;
    impl EntityExtractor for Dummy {
        fn extract(&self, _text: &str) -> Vec<ExtractedEntity> {
            Vec::new()
        }
    }

    #[test]
    fn normalize_collapses_whitespace_and_punctuation() {
        assert_eq!(Dummy::normalize("Python Programming!"), "python_programming");
        assert_eq!(Dummy::normalize("  multi   space  "), "multi_space");
    }
}
