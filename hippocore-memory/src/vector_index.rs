//! C3: HNSW-backed `VectorIndex` (§4.3).
//!
//! Grounded on `llmspell-memory::episodic::hnsw_backend` for the
//! "authoritative chunk map + id-mapped ANN index" wiring and
//! `llmspell-rag::traits::hnsw::HNSWConfig` for the construction
//! parameters (`m`/`ef_construction`/`ef_search`), adapted from the
//! teacher's multi-tenant-namespace `HNSWStorage` trait (dropped, see
//! `DESIGN.md`) to a single-namespace index matching
//! `hippocore_core::traits::VectorIndex`. Persistence follows the
//! teacher's write-temp-then-rename snapshot discipline
//! (`hippocore-graph::storage`) plus a WAL of ops since the last
//! snapshot, replayed on `open` (§4.3 crash-safety requirement).

use crate::error::{index_degraded, model_unavailable};
use async_trait::async_trait;
use dashmap::DashMap;
use hippocore_core::error::Result;
use hippocore_core::traits::{MetadataFilter, VectorHit, VectorIndex};
use hippocore_core::types::Chunk;
use hnsw_rs::prelude::*;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::HnswIndexConfig;

#[derive(Debug, Serialize, Deserialize)]
enum WalRecord {
    Upsert(Chunk),
    Delete(Uuid),
}

/// `DashMap`-backed chunk store plus an `hnsw_rs` ANN index over their
/// embeddings. One process, one namespace, single-writer/multi-reader
/// (§5): writes append to the WAL before becoming visible; reads never
/// block on a write in flight.
pub struct HnswVectorIndex {
    config: HnswIndexConfig,
    chunks: DashMap<Uuid, Chunk>,
    id_of: DashMap<Uuid, usize>,
    chunk_of: DashMap<usize, Uuid>,
    tombstones: DashMap<usize, ()>,
    next_internal_id: AtomicUsize,
    hnsw: RwLock<Hnsw<'static, f32, DistCosine>>,
    data_dir: Option<PathBuf>,
    wal: RwLock<Option<std::fs::File>>,
}

impl HnswVectorIndex {
    #[must_use]
    pub fn new(config: HnswIndexConfig) -> Self {
        let hnsw = build_hnsw(&config);
        Self {
            config,
            chunks: DashMap::new(),
            id_of: DashMap::new(),
            chunk_of: DashMap::new(),
            tombstones: DashMap::new(),
            next_internal_id: AtomicUsize::new(0),
            hnsw: RwLock::new(hnsw),
            data_dir: None,
            wal: RwLock::new(None),
        }
    }

    /// Open (or create) a persisted index rooted at `data_dir`: loads
    /// `vectors.snapshot` if present, then replays `vectors.wal` on top
    /// of it (§4.3 recovery).
    pub fn open(config: HnswIndexConfig, data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        let mut index = Self::new(config);
        index.data_dir = Some(data_dir.clone());

        let snapshot_path = snapshot_path(&data_dir);
        if snapshot_path.exists() {
            let bytes = fs::read(&snapshot_path)?;
            let chunks: Vec<Chunk> = bincode::deserialize(&bytes)
                .map_err(|e| index_degraded(format!("corrupt snapshot: {e}")))?;
            info!(count = chunks.len(), "loaded vector snapshot");
            for chunk in chunks {
                index.insert_chunk(chunk);
            }
        }

        let wal_path = wal_path(&data_dir);
        if wal_path.exists() {
            match replay_wal(&wal_path) {
                Ok(records) => {
                    info!(count = records.len(), "replaying WAL tail");
                    for record in records {
                        match record {
                            WalRecord::Upsert(chunk) => index.insert_chunk(chunk),
                            WalRecord::Delete(id) => index.remove_chunk(id),
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "WAL corrupted, failing open on last-known-good snapshot");
                    return Err(index_degraded(format!("WAL corruption: {e}")));
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&wal_path)?;
        *index.wal.write() = Some(file);
        Ok(index)
    }

    /// Write a fresh snapshot and truncate the WAL, so recovery on the
    /// next `open` has less to replay.
    pub fn checkpoint(&self) -> Result<()> {
        let Some(data_dir) = &self.data_dir else {
            return Ok(());
        };
        let chunks: Vec<Chunk> = self.chunks.iter().map(|e| e.value().clone()).collect();
        let bytes = bincode::serialize(&chunks).map_err(|e| index_degraded(e.to_string()))?;
        let tmp = snapshot_path(data_dir).with_extension("snapshot.tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, snapshot_path(data_dir))?;

        let wal_path = wal_path(data_dir);
        let file = OpenOptions::new().create(true).write(true).truncate(true).open(&wal_path)?;
        *self.wal.write() = Some(file);
        debug!(chunks = chunks.len(), "checkpointed vector index");
        Ok(())
    }

    fn append_wal(&self, record: &WalRecord) -> Result<()> {
        let mut guard = self.wal.write();
        if let Some(file) = guard.as_mut() {
            let bytes = bincode::serialize(record).map_err(|e| index_degraded(e.to_string()))?;
            file.write_all(&(bytes.len() as u64).to_le_bytes())?;
            file.write_all(&bytes)?;
            file.flush()?;
        }
        Ok(())
    }

    fn insert_chunk(&self, chunk: Chunk) {
        let Some(embedding) = chunk.embedding.clone() else {
            warn!(chunk_id = %chunk.chunk_id, "upserted chunk missing embedding, skipping index insert");
            return;
        };
        let internal_id = if let Some(existing) = self.id_of.get(&chunk.chunk_id) {
            *existing
        } else {
            let id = self.next_internal_id.fetch_add(1, Ordering::SeqCst);
            self.id_of.insert(chunk.chunk_id, id);
            self.chunk_of.insert(id, chunk.chunk_id);
            id
        };
        self.tombstones.remove(&internal_id);
        self.maybe_grow(internal_id);
        self.hnsw.read().insert((&embedding, internal_id));
        self.chunks.insert(chunk.chunk_id, chunk);
    }

    fn remove_chunk(&self, chunk_id: Uuid) -> bool {
        self.chunks.remove(&chunk_id);
        if let Some((_, internal_id)) = self.id_of.remove(&chunk_id) {
            self.chunk_of.remove(&internal_id);
            self.tombstones.insert(internal_id, ());
            true
        } else {
            false
        }
    }

    /// Rebuild with double capacity if the index has grown past what it
    /// was constructed for (`hnsw_rs` is sized up front).
    fn maybe_grow(&self, internal_id: usize) {
        if internal_id + 1 < self.config.max_elements {
            return;
        }
        warn!(internal_id, "hnsw capacity reached, rebuilding with doubled capacity");
        let mut grown = self.config.clone();
        grown.max_elements *= 2;
        let new_hnsw = build_hnsw(&grown);
        for entry in &self.chunks {
            if let (Some(embedding), Some(id)) = (entry.embedding.as_ref(), self.id_of.get(entry.key())) {
                new_hnsw.insert((embedding, *id));
            }
        }
        *self.hnsw.write() = new_hnsw;
    }

    fn matches_filter(chunk: &Chunk, filter: &MetadataFilter) -> bool {
        if let Some(stages) = &filter.stages {
            if !stages.contains(&chunk.metadata.stage) {
                return false;
            }
        }
        if filter.require_verified && !chunk.metadata.verified {
            return false;
        }
        true
    }
}

fn build_hnsw(config: &HnswIndexConfig) -> Hnsw<'static, f32, DistCosine> {
    Hnsw::new(
        config.m,
        config.max_elements,
        config.max_layers,
        config.ef_construction,
        DistCosine {},
    )
}

fn snapshot_path(data_dir: &Path) -> PathBuf {
    data_dir.join("vectors.snapshot")
}

fn wal_path(data_dir: &Path) -> PathBuf {
    data_dir.join("vectors.wal")
}

fn replay_wal(path: &Path) -> std::io::Result<Vec<WalRecord>> {
    let mut file = OpenOptions::new().read(true).open(path)?;
    let mut records = Vec::new();
    loop {
        let mut len_bytes = [0u8; 8];
        match file.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
        let len = u64::from_le_bytes(len_bytes) as usize;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        match bincode::deserialize::<WalRecord>(&buf) {
            Ok(record) => records.push(record),
            Err(_) => break, // truncated tail record from a mid-write crash; stop here
        }
    }
    Ok(records)
}

#[async_trait]
impl VectorIndex for HnswVectorIndex {
    async fn upsert(&self, chunks: Vec<Chunk>) -> Result<usize> {
        for chunk in &chunks {
            if chunk.embedding.is_none() {
                return Err(model_unavailable("chunk missing embedding at upsert time"));
            }
            if let Some(embedding) = &chunk.embedding {
                if embedding.len() != hippocore_core::types::EMBEDDING_DIM {
                    return Err(hippocore_core::error::HippoError::InvalidInput(format!(
                        "embedding dimension mismatch: expected {}, got {}",
                        hippocore_core::types::EMBEDDING_DIM,
                        embedding.len()
                    )));
                }
            }
        }
        let count = chunks.len();
        for chunk in chunks {
            self.append_wal(&WalRecord::Upsert(chunk.clone()))?;
            self.insert_chunk(chunk);
        }
        trace!(count, "upserted chunks");
        Ok(count)
    }

    async fn search(
        &self,
        query_vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let total = self.chunks.len();
        if let Some(filter) = filter {
            let matching: Vec<Uuid> = self
                .chunks
                .iter()
                .filter(|e| Self::matches_filter(e.value(), filter))
                .map(|e| *e.key())
                .collect();

            // Pre-filter: brute-force cosine over the small matching set
            // rather than paying for an ANN search plus post-filtering
            // (§4.3: "pre-filter bitmap when filter cardinality is small").
            if total == 0 || matching.len() * 10 < total {
                let mut scored: Vec<VectorHit> = matching
                    .into_iter()
                    .filter_map(|id| self.chunks.get(&id))
                    .filter_map(|entry| {
                        entry.value().embedding.as_ref().map(|e| VectorHit {
                            chunk_id: entry.key().clone(),
                            score: cosine_similarity(query_vector, e),
                        })
                    })
                    .collect();
                sort_hits(&mut scored);
                scored.truncate(k);
                return Ok(scored);
            }
        }

        // Post-filter path: over-fetch candidates from the ANN index,
        // then filter and truncate.
        let ef_search = self.config.ef_search.max(k);
        let fetch_k = if filter.is_some() { (k * 4).max(ef_search) } else { k };
        let neighbours = self.hnsw.read().search(query_vector, fetch_k, ef_search);

        let mut hits = Vec::with_capacity(neighbours.len());
        for n in neighbours {
            if self.tombstones.contains_key(&n.d_id) {
                continue;
            }
            let Some(chunk_id) = self.chunk_of.get(&n.d_id).map(|e| *e) else {
                continue;
            };
            let Some(chunk) = self.chunks.get(&chunk_id) else {
                continue;
            };
            if let Some(filter) = filter {
                if !Self::matches_filter(chunk.value(), filter) {
                    continue;
                }
            }
            // hnsw_rs's DistCosine reports a distance (1 - cosine); undo
            // that to return the similarity the contract promises.
            hits.push(VectorHit {
                chunk_id,
                score: 1.0 - n.distance,
            });
        }
        sort_hits(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete(&self, chunk_ids: &[Uuid]) -> Result<usize> {
        let mut deleted = 0;
        for id in chunk_ids {
            self.append_wal(&WalRecord::Delete(*id))?;
            if self.remove_chunk(*id) {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn get(&self, chunk_id: Uuid) -> Result<Option<Chunk>> {
        Ok(self.chunks.get(&chunk_id).map(|e| e.value().clone()))
    }

    async fn count(&self, filter: Option<&MetadataFilter>) -> Result<usize> {
        Ok(match filter {
            Some(filter) => self.chunks.iter().filter(|e| Self::matches_filter(e.value(), filter)).count(),
            None => self.chunks.len(),
        })
    }
}

impl HnswVectorIndex {
    /// Snapshot of every chunk currently stored, for the
    /// `LifecycleManager`'s sweep (not part of the `VectorIndex` trait —
    /// a full scan is an implementation detail of this index, not a
    /// contract every backend must support).
    #[must_use]
    pub fn all_chunks(&self) -> Vec<Chunk> {
        self.chunks.iter().map(|e| e.value().clone()).collect()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Sort descending by score; ties broken by `chunk_id` lexicographic
/// order (§4.3).
fn sort_hits(hits: &mut [VectorHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.to_string().cmp(&b.chunk_id.to_string()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use hippocore_core::types::{ChunkMetadata, Stage};

    fn unit_vec(seed: f32) -> Vec<f32> {
        let mut v = vec![0.0f32; hippocore_core::types::EMBEDDING_DIM];
        v[0] = seed;
        v[1] = (1.0 - seed * seed).max(0.0).sqrt();
        v
    }

    fn chunk_with(text: &str, embedding: Vec<f32>, stage: Stage, verified: bool) -> Chunk {
        let mut metadata = ChunkMetadata::new("notes/a.md", 0);
        metadata.stage = stage;
        metadata.verified = verified;
        Chunk {
            chunk_id: Uuid::new_v4(),
            text: text.to_string(),
            embedding: Some(embedding),
            content_hash: "hash".to_string(),
            metadata,
        }
    }

    #[tokio::test]
    async fn upsert_then_search_finds_self() {
        let index = HnswVectorIndex::new(HnswIndexConfig::default());
        let chunk = chunk_with("hello", unit_vec(0.9), Stage::Active, true);
        let id = chunk.chunk_id;
        index.upsert(vec![chunk.clone()]).await.unwrap();

        let hits = index.search(&unit_vec(0.9), 1, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, id);
        assert!(hits[0].score > 0.99);
    }

    #[tokio::test]
    async fn k_zero_returns_empty() {
        let index = HnswVectorIndex::new(HnswIndexConfig::default());
        index.upsert(vec![chunk_with("x", unit_vec(0.5), Stage::Active, true)]).await.unwrap();
        let hits = index.search(&unit_vec(0.5), 0, None).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let index = HnswVectorIndex::new(HnswIndexConfig::default());
        let chunk = chunk_with("x", unit_vec(0.1), Stage::Active, true);
        let id = chunk.chunk_id;
        index.upsert(vec![chunk]).await.unwrap();
        assert_eq!(index.delete(&[id]).await.unwrap(), 1);
        assert_eq!(index.delete(&[id]).await.unwrap(), 0);
        assert!(index.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn filter_excludes_archived_stage() {
        let index = HnswVectorIndex::new(HnswIndexConfig::default());
        index.upsert(vec![chunk_with("active", unit_vec(0.9), Stage::Active, true)]).await.unwrap();
        index.upsert(vec![chunk_with("archived", unit_vec(0.9), Stage::Archived, true)]).await.unwrap();

        let filter = MetadataFilter {
            stages: Some(vec![Stage::Active]),
            require_verified: false,
        };
        let hits = index.search(&unit_vec(0.9), 10, Some(&filter)).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn snapshot_and_reopen_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let index = HnswVectorIndex::open(HnswIndexConfig::default(), dir.path()).unwrap();
        let chunk = chunk_with("persisted", unit_vec(0.7), Stage::Active, true);
        let id = chunk.chunk_id;
        index.upsert(vec![chunk]).await.unwrap();
        index.checkpoint().unwrap();

        let reopened = HnswVectorIndex::open(HnswIndexConfig::default(), dir.path()).unwrap();
        assert!(reopened.get(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn wal_replays_writes_made_after_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let index = HnswVectorIndex::open(HnswIndexConfig::default(), dir.path()).unwrap();
        let first = chunk_with("checkpointed", unit_vec(0.2), Stage::Active, true);
        index.upsert(vec![first]).await.unwrap();
        index.checkpoint().unwrap();

        let second = chunk_with("wal-only", unit_vec(0.3), Stage::Active, true);
        let second_id = second.chunk_id;
        index.upsert(vec![second]).await.unwrap();
        drop(index);

        let reopened = HnswVectorIndex::open(HnswIndexConfig::default(), dir.path()).unwrap();
        assert!(reopened.get(second_id).await.unwrap().is_some());
    }
}
