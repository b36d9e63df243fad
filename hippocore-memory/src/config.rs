//! Crate-local configuration for chunking and the HNSW vector index.
//!
//! Grounded on `llmspell-rag::chunking::strategies::ChunkingConfig` (the
//! teacher's plain-struct-with-`Default` shape) and
//! `llmspell-rag::traits::hnsw::HNSWConfig` (the `fast`/`accurate`/
//! `balanced` preset convention), adapted to the spec's fixed
//! 128-512 token window and 384-dimension embedding (§4.1, §4.3).

use serde::{Deserialize, Serialize};

/// Chunker window bounds and overlap (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Lower bound of the target window, in estimated tokens.
    pub min_tokens: usize,
    /// Upper bound of the target window, in estimated tokens.
    pub max_tokens: usize,
    /// Tokens carried from the tail of an emitted window into the next
    /// one when a window is closed by overflow rather than a natural
    /// boundary.
    pub overlap_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_tokens: 128,
            max_tokens: 512,
            overlap_tokens: 50,
        }
    }
}

/// HNSW index construction/search parameters (§4.3).
///
/// Field names and presets mirror the teacher's `HNSWConfig`; `metric` is
/// dropped since this engine only ever indexes L2-normalized embeddings
/// under cosine similarity (§3 invariant: "every embedding is a unit
/// vector").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswIndexConfig {
    /// Bi-directional links per node.
    pub m: usize,
    /// Candidate list size during construction.
    pub ef_construction: usize,
    /// Candidate list size during search.
    pub ef_search: usize,
    /// Maximum number of layers in the hierarchy.
    pub max_layers: usize,
    /// Upper bound on the number of vectors the index is sized for.
    pub max_elements: usize,
}

impl Default for HnswIndexConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 100,
            max_layers: 16,
            max_elements: 100_000,
        }
    }
}

impl HnswIndexConfig {
    /// Tuned for low-latency search at the cost of recall.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            m: 12,
            ef_construction: 100,
            ef_search: 50,
            ..Default::default()
        }
    }

    /// Tuned for recall at the cost of search latency.
    #[must_use]
    pub fn accurate() -> Self {
        Self {
            m: 32,
            ef_construction: 400,
            ef_search: 200,
            ..Default::default()
        }
    }
}
