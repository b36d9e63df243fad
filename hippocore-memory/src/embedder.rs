//! C2: a deterministic reference implementation of the `Embedder`
//! capability (§4.2).
//!
//! The spec treats embedding as an opaque external capability; this
//! crate ships one concrete, deterministic implementation so the rest
//! of the engine (and its tests) have something to run against without
//! a real model dependency — grounded on the teacher's
//! `EmbeddingService`/`MockEmbeddingProvider` pair
//! (`llmspell-memory::embeddings::mod`): a thin wrapper over a pluggable
//! provider, with the test-double shaped the same way a production
//! provider would be (name, dimensions, batch `encode`).

use async_trait::async_trait;
use hippocore_core::error::{HippoError, Result};
use hippocore_core::traits::Embedder;
use hippocore_core::types::EMBEDDING_DIM;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Deterministic `(text) -> unit vector` embedder: the same text always
/// hashes to the same vector (§4.2 determinism contract), with no model
/// weights or network calls involved.
///
/// Not intended to produce semantically meaningful embeddings — only to
/// satisfy the `Embedder` contract exactly, including the
/// `ModelUnavailable` failure mode (toggled via [`Self::set_available`]
/// for testing degraded-capability paths).
pub struct ReferenceEmbedder {
    model_id: String,
    dim: usize,
    available: Arc<AtomicBool>,
}

impl Default for ReferenceEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceEmbedder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            model_id: "hippocore-reference-embedder-v1".to_string(),
            dim: EMBEDDING_DIM,
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate the embedding capability going down, for exercising
    /// `ModelUnavailable` propagation in callers (§4.2, §7).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn encode_one(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        let mut state = u64::from_le_bytes(digest[0..8].try_into().unwrap());
        let mut vector = Vec::with_capacity(self.dim);
        for _ in 0..self.dim {
            state = splitmix64(state);
            let unit = (state >> 11) as f64 / (1u64 << 53) as f64; // [0, 1)
            vector.push((unit * 2.0 - 1.0) as f32);
        }
        l2_normalize(&mut vector);
        vector
    }
}

/// SplitMix64, used purely as a fast deterministic byte-stream expander
/// from a 64-bit seed — not a cryptographic primitive.
const fn splitmix64(mut state: u64) -> u64 {
    state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

#[async_trait]
impl Embedder for ReferenceEmbedder {
    fn name(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dim
    }

    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(HippoError::ModelUnavailable(self.model_id.clone()));
        }
        if texts.is_empty() {
            trace!("encode called with empty batch");
            return Ok(Vec::new());
        }
        debug!(batch_size = texts.len(), "encoding batch");
        Ok(texts.iter().map(|t| self.encode_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn encode_is_deterministic() {
        let embedder = ReferenceEmbedder::new();
        let a = embedder.encode_single("hello world").await.unwrap();
        let b = embedder.encode_single("hello world").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn vectors_are_unit_normalized() {
        let embedder = ReferenceEmbedder::new();
        let v = embedder.encode_single("some chunk text").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "norm was {norm}");
    }

    #[tokio::test]
    async fn dimensions_match_spec_constant() {
        let embedder = ReferenceEmbedder::new();
        let v = embedder.encode_single("x").await.unwrap();
        assert_eq!(v.len(), EMBEDDING_DIM);
        assert_eq!(embedder.dimensions(), EMBEDDING_DIM);
    }

    #[tokio::test]
    async fn empty_batch_yields_empty_output() {
        let embedder = ReferenceEmbedder::new();
        let out = embedder.encode(&[]).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn unavailable_model_surfaces_model_unavailable() {
        let embedder = ReferenceEmbedder::new();
        embedder.set_available(false);
        let err = embedder.encode(&["x".to_string()]).await.unwrap_err();
        assert!(matches!(err, HippoError::ModelUnavailable(_)));
    }

    #[tokio::test]
    async fn different_text_yields_different_vectors() {
        let embedder = ReferenceEmbedder::new();
        let a = embedder.encode_single("alpha").await.unwrap();
        let b = embedder.encode_single("beta").await.unwrap();
        assert_ne!(a, b);
    }
}
