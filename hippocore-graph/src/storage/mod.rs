//! In-memory graph store with atomic snapshot persistence.
//!
//! Grounded on the teacher's swappable `GraphBackend` shape
//! (`llmspell-graph::storage`), minus the `SurrealDB`/`PostgreSQL`
//! backend split: a single-user engine has no multi-tenant durability
//! requirement, so the graph lives in `DashMap`s guarded by the
//! process lifetime and snapshots to disk the way
//! `llmspell-memory`'s consolidation daemon checkpoints state — write
//! to a temp file, then rename (§9a Open Question 4).

use async_trait::async_trait;
use dashmap::DashMap;
use hippocore_core::error::Result;
use hippocore_core::traits::{GraphIndex, ReachedNode};
use hippocore_core::types::{Edge, EdgeType, Entity};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Adjacency list keyed by source entity id.
type AdjacencyMap = DashMap<String, Vec<Edge>>;

/// On-disk representation of the whole graph, used for snapshot
/// persistence (serde_json: human-diffable, rebuildable from chunks in
/// an emergency, per the Open Question 4 resolution).
#[derive(Debug, Default, Serialize, Deserialize)]
struct GraphSnapshot {
    entities: Vec<Entity>,
    edges: Vec<Edge>,
    chunk_nodes: Vec<Uuid>,
}

/// Single-process, `DashMap`-backed entity/chunk graph.
pub struct InMemoryGraph {
    entities: DashMap<String, Entity>,
    /// outgoing edges, keyed by `from`
    out_edges: AdjacencyMap,
    chunk_nodes: DashMap<Uuid, ()>,
    /// Reverse index for `mentions` edges: entity id -> chunks that
    /// mention it. Kept alongside `out_edges` rather than derived on
    /// demand, since `rank_chunks_by_ppr` is on the RECALL hot path.
    mentioned_by: DashMap<String, HashSet<Uuid>>,
    snapshot_path: Option<PathBuf>,
    dirty: AtomicBool,
}

impl InMemoryGraph {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entities: DashMap::new(),
            out_edges: DashMap::new(),
            chunk_nodes: DashMap::new(),
            mentioned_by: DashMap::new(),
            snapshot_path: None,
            dirty: AtomicBool::new(false),
        }
    }

    /// Load from a snapshot file if it exists; otherwise start empty.
    /// Subsequent calls to [`Self::snapshot`] write back to this path.
    pub fn open(snapshot_path: impl Into<PathBuf>) -> Result<Self> {
        let path = snapshot_path.into();
        let mut graph = Self::new();
        if path.exists() {
            let bytes = std::fs::read(&path)?;
            let snapshot: GraphSnapshot = serde_json::from_slice(&bytes)?;
            info!(
                entities = snapshot.entities.len(),
                edges = snapshot.edges.len(),
                "loaded graph snapshot from {}",
                path.display()
            );
            for entity in snapshot.entities {
                graph.entities.insert(entity.entity_id.clone(), entity);
            }
            for edge in snapshot.edges {
                graph.index_mentions(&edge);
                graph.out_edges.entry(edge.from.clone()).or_default().push(edge);
            }
            for chunk_id in snapshot.chunk_nodes {
                graph.chunk_nodes.insert(chunk_id, ());
            }
        }
        graph.snapshot_path = Some(path);
        Ok(graph)
    }

    /// Atomically persist the current graph: write to a sibling temp
    /// file, then rename over the target. A crash mid-write leaves the
    /// prior snapshot intact.
    pub fn snapshot(&self) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let snapshot = GraphSnapshot {
            entities: self.entities.iter().map(|e| e.value().clone()).collect(),
            edges: self.out_edges.iter().flat_map(|e| e.value().clone()).collect(),
            chunk_nodes: self.chunk_nodes.iter().map(|e| *e.key()).collect(),
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        let tmp_path = tmp_path_for(path);
        std::fs::write(&tmp_path, &bytes)?;
        std::fs::rename(&tmp_path, path)?;
        self.dirty.store(false, Ordering::Relaxed);
        debug!("snapshotted graph to {}", path.display());
        Ok(())
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }

    /// A `mentions` edge's `from` is a chunk id serialized as a string
    /// (§3: "chunk -> entity"); maintain the reverse index whenever one
    /// is inserted or loaded from a snapshot.
    fn index_mentions(&self, edge: &Edge) {
        if edge.edge_type != EdgeType::Mentions {
            return;
        }
        if let Ok(chunk_id) = edge.from.parse::<Uuid>() {
            self.mentioned_by.entry(edge.to.clone()).or_default().insert(chunk_id);
        }
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

impl Default for InMemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphIndex for InMemoryGraph {
    async fn add_chunk_node(&self, chunk_id: Uuid) -> Result<()> {
        self.chunk_nodes.insert(chunk_id, ());
        self.mark_dirty();
        Ok(())
    }

    async fn add_entity(&self, entity: Entity) -> Result<()> {
        self.entities
            .entry(entity.entity_id.clone())
            .and_modify(|existing| existing.mention_count += entity.mention_count)
            .or_insert(entity);
        self.mark_dirty();
        Ok(())
    }

    async fn add_edge(
        &self,
        from: &str,
        to: &str,
        edge_type: EdgeType,
        weight: f32,
        confidence: f32,
    ) -> Result<()> {
        let mut edges = self.out_edges.entry(from.to_string()).or_default();
        if let Some(existing) = edges
            .iter_mut()
            .find(|e| e.to == to && e.edge_type == edge_type)
        {
            existing.weight = existing.weight.max(weight);
            existing.confidence = existing.confidence.max(confidence);
        } else {
            let edge = Edge {
                from: from.to_string(),
                to: to.to_string(),
                edge_type,
                weight,
                confidence,
            };
            self.index_mentions(&edge);
            edges.push(edge);
        }
        drop(edges);
        self.mark_dirty();
        Ok(())
    }

    async fn get_entity(&self, entity_id: &str) -> Result<Option<Entity>> {
        Ok(self.entities.get(entity_id).map(|e| e.value().clone()))
    }

    async fn neighbors(
        &self,
        entity_id: &str,
        depth: usize,
        edge_types: &[EdgeType],
    ) -> Result<Vec<ReachedNode>> {
        if depth == 0 {
            return Ok(Vec::new());
        }
        let allow = |et: EdgeType| edge_types.is_empty() || edge_types.contains(&et);
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(entity_id.to_string());
        let mut frontier: VecDeque<(String, usize, Vec<String>)> = VecDeque::new();
        frontier.push_back((entity_id.to_string(), 0, vec![entity_id.to_string()]));
        let mut reached = Vec::new();

        while let Some((node, dist, path)) = frontier.pop_front() {
            if dist >= depth {
                continue;
            }
            let Some(edges) = self.out_edges.get(&node) else {
                continue;
            };
            for edge in edges.value() {
                if !allow(edge.edge_type) || visited.contains(&edge.to) {
                    continue;
                }
                visited.insert(edge.to.clone());
                let mut next_path = path.clone();
                next_path.push(edge.to.clone());
                reached.push(ReachedNode {
                    entity_id: edge.to.clone(),
                    distance: dist + 1,
                    path: next_path.clone(),
                });
                frontier.push_back((edge.to.clone(), dist + 1, next_path));
            }
        }
        trace!(entity_id, depth, found = reached.len(), "bfs neighbors");
        Ok(reached)
    }

    async fn personalized_pagerank(
        &self,
        seed_nodes: &[String],
        alpha: f32,
        max_iter: usize,
        tol: f32,
    ) -> Result<HashMap<String, f32>> {
        if seed_nodes.is_empty() {
            return Ok(HashMap::new());
        }

        // Restrict the walk to the subgraph reachable from the seeds so an
        // isolated seed set degenerates to a uniform distribution over
        // just those seeds, rather than the whole graph.
        let mut nodes: HashSet<String> = seed_nodes.iter().cloned().collect();
        let mut frontier: Vec<String> = seed_nodes.to_vec();
        while let Some(node) = frontier.pop() {
            if let Some(edges) = self.out_edges.get(&node) {
                for edge in edges.value() {
                    if nodes.insert(edge.to.clone()) {
                        frontier.push(edge.to.clone());
                    }
                }
            }
        }
        let node_list: Vec<String> = nodes.into_iter().collect();
        let index: HashMap<&str, usize> = node_list
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();
        let n = node_list.len();

        // Row-normalized weighted transition matrix, weight * confidence.
        let mut out: Vec<Vec<(usize, f32)>> = vec![Vec::new(); n];
        for (i, node) in node_list.iter().enumerate() {
            if let Some(edges) = self.out_edges.get(node) {
                let total: f32 = edges.value().iter().map(|e| e.weight * e.confidence).sum();
                if total > 0.0 {
                    for edge in edges.value() {
                        if let Some(&j) = index.get(edge.to.as_str()) {
                            out[i].push((j, (edge.weight * edge.confidence) / total));
                        }
                    }
                }
            }
        }

        let mut seed_dist = vec![0.0f32; n];
        let seed_weight = 1.0 / seed_nodes.len() as f32;
        for seed in seed_nodes {
            if let Some(&i) = index.get(seed.as_str()) {
                seed_dist[i] += seed_weight;
            }
        }

        let mut rank = seed_dist.clone();
        for _ in 0..max_iter {
            let mut next = vec![0.0f32; n];
            for (i, targets) in out.iter().enumerate() {
                if targets.is_empty() {
                    // dangling node: redistribute its mass back to the seed distribution
                    for (j, s) in seed_dist.iter().enumerate() {
                        next[j] += alpha * rank[i] * s;
                    }
                    continue;
                }
                for &(j, p) in targets {
                    next[j] += alpha * rank[i] * p;
                }
            }
            for (j, s) in seed_dist.iter().enumerate() {
                next[j] += (1.0 - alpha) * s;
            }

            let delta: f32 = next.iter().zip(rank.iter()).map(|(a, b)| (a - b).abs()).sum();
            rank = next;
            if delta < tol {
                break;
            }
        }

        let total: f32 = rank.iter().sum();
        if total <= 0.0 {
            warn!("ppr converged to zero mass, falling back to uniform over seeds");
            return Ok(seed_nodes
                .iter()
                .map(|s| (s.clone(), seed_weight))
                .collect());
        }
        Ok(node_list
            .into_iter()
            .zip(rank)
            .map(|(name, score)| (name, score / total))
            .collect())
    }

    async fn remove_chunk(&self, chunk_id: Uuid) -> Result<()> {
        self.chunk_nodes.remove(&chunk_id);
        self.out_edges.remove(&chunk_id.to_string());
        for mut entry in self.mentioned_by.iter_mut() {
            entry.value_mut().remove(&chunk_id);
        }
        self.mark_dirty();
        Ok(())
    }

    async fn edges_from(&self, entity_id: &str) -> Result<Vec<Edge>> {
        Ok(self
            .out_edges
            .get(entity_id)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }

    async fn chunks_mentioning(&self, entity_id: &str) -> Result<Vec<Uuid>> {
        Ok(self
            .mentioned_by
            .get(entity_id)
            .map(|e| e.value().iter().copied().collect())
            .unwrap_or_default())
    }

    async fn rank_chunks_by_ppr(
        &self,
        ppr_scores: &HashMap<String, f32>,
        top_k: usize,
    ) -> Result<Vec<(Uuid, f32)>> {
        let mut scored: HashMap<Uuid, f32> = HashMap::new();
        for (entity_id, score) in ppr_scores {
            let Some(chunks) = self.mentioned_by.get(entity_id) else {
                continue;
            };
            for chunk_id in chunks.value() {
                *scored.entry(*chunk_id).or_insert(0.0) += score;
            }
        }
        let mut ranked: Vec<(Uuid, f32)> = scored.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.to_string().cmp(&b.0.to_string()))
        });
        ranked.truncate(top_k);
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hippocore_core::types::EntityType;

    fn entity(id: &str) -> Entity {
        Entity::new(id, id, EntityType::Concept)
    }

    #[tokio::test]
    async fn add_entity_merges_mention_count() {
        let graph = InMemoryGraph::new();
        graph.add_entity(entity("rust")).await.unwrap();
        graph.add_entity(entity("rust")).await.unwrap();
        let e = graph.get_entity("rust").await.unwrap().unwrap();
        assert_eq!(e.mention_count, 2);
    }

    #[tokio::test]
    async fn add_edge_upgrades_duplicate_by_max() {
        let graph = InMemoryGraph::new();
        graph
            .add_edge("rust", "memory_safety", EdgeType::RelatedTo, 0.5, 0.5)
            .await
            .unwrap();
        graph
            .add_edge("rust", "memory_safety", EdgeType::RelatedTo, 0.9, 0.2)
            .await
            .unwrap();
        let edges = graph.edges_from("rust").await.unwrap();
        assert_eq!(edges.len(), 1);
        assert!((edges[0].weight - 0.9).abs() < f32::EPSILON);
        assert!((edges[0].confidence - 0.5).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn neighbors_respects_depth_and_edge_type() {
        let graph = InMemoryGraph::new();
        graph
            .add_edge("a", "b", EdgeType::RelatedTo, 1.0, 1.0)
            .await
            .unwrap();
        graph
            .add_edge("b", "c", EdgeType::RelatedTo, 1.0, 1.0)
            .await
            .unwrap();
        graph
            .add_edge("a", "d", EdgeType::Mentions, 1.0, 1.0)
            .await
            .unwrap();

        let one_hop = graph.neighbors("a", 1, &[EdgeType::RelatedTo]).await.unwrap();
        assert_eq!(one_hop.len(), 1);
        assert_eq!(one_hop[0].entity_id, "b");

        let two_hop = graph.neighbors("a", 2, &[EdgeType::RelatedTo]).await.unwrap();
        assert_eq!(two_hop.len(), 2);
        assert!(two_hop.iter().any(|n| n.entity_id == "c" && n.distance == 2));
    }

    #[tokio::test]
    async fn ppr_empty_seed_returns_empty_map() {
        let graph = InMemoryGraph::new();
        let scores = graph
            .personalized_pagerank(&[], 0.85, 100, 1e-6)
            .await
            .unwrap();
        assert!(scores.is_empty());
    }

    #[tokio::test]
    async fn ppr_isolated_seed_is_uniform() {
        let graph = InMemoryGraph::new();
        let seeds = vec!["a".to_string(), "b".to_string()];
        let scores = graph
            .personalized_pagerank(&seeds, 0.85, 100, 1e-6)
            .await
            .unwrap();
        assert_eq!(scores.len(), 2);
        assert!((scores["a"] - 0.5).abs() < 1e-3);
        assert!((scores["b"] - 0.5).abs() < 1e-3);
    }

    #[tokio::test]
    async fn ppr_concentrates_on_connected_neighbor() {
        let graph = InMemoryGraph::new();
        graph
            .add_edge("seed", "near", EdgeType::RelatedTo, 1.0, 1.0)
            .await
            .unwrap();
        graph.add_entity(entity("far")).await.unwrap();
        let seeds = vec!["seed".to_string()];
        let scores = graph
            .personalized_pagerank(&seeds, 0.85, 100, 1e-6)
            .await
            .unwrap();
        assert!(scores.get("near").copied().unwrap_or(0.0) > 0.0);
        assert!(scores.get("far").is_none());
    }

    #[tokio::test]
    async fn chunks_mentioning_returns_reverse_lookup() {
        let graph = InMemoryGraph::new();
        let chunk_id = Uuid::new_v4();
        graph
            .add_edge(&chunk_id.to_string(), "rust", EdgeType::Mentions, 1.0, 1.0)
            .await
            .unwrap();
        let chunks = graph.chunks_mentioning("rust").await.unwrap();
        assert_eq!(chunks, vec![chunk_id]);
        assert!(graph.chunks_mentioning("nonexistent").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_chunk_purges_mentioned_by() {
        let graph = InMemoryGraph::new();
        let chunk_id = Uuid::new_v4();
        graph
            .add_edge(&chunk_id.to_string(), "rust", EdgeType::Mentions, 1.0, 1.0)
            .await
            .unwrap();
        graph.remove_chunk(chunk_id).await.unwrap();
        assert!(graph.chunks_mentioning("rust").await.unwrap().is_empty());
        assert!(graph.edges_from(&chunk_id.to_string()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_chunk_is_not_resurrected_by_a_snapshot_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        let graph = InMemoryGraph::open(&path).unwrap();
        let chunk_id = Uuid::new_v4();
        graph
            .add_edge(&chunk_id.to_string(), "rust", EdgeType::Mentions, 1.0, 1.0)
            .await
            .unwrap();
        graph.remove_chunk(chunk_id).await.unwrap();
        graph.snapshot().unwrap();

        let reloaded = InMemoryGraph::open(&path).unwrap();
        assert!(reloaded.chunks_mentioning("rust").await.unwrap().is_empty());
        assert!(reloaded.edges_from(&chunk_id.to_string()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rank_chunks_by_ppr_aggregates_multiple_seed_mentions() {
        // chunk_1 mentions both seed entities, chunk_2 mentions only one;
        // chunk_1 must rank strictly above chunk_2.
        let graph = InMemoryGraph::new();
        let chunk_1 = Uuid::new_v4();
        let chunk_2 = Uuid::new_v4();
        graph
            .add_edge(&chunk_1.to_string(), "rust", EdgeType::Mentions, 1.0, 1.0)
            .await
            .unwrap();
        graph
            .add_edge(&chunk_1.to_string(), "memory_safety", EdgeType::Mentions, 1.0, 1.0)
            .await
            .unwrap();
        graph
            .add_edge(&chunk_2.to_string(), "rust", EdgeType::Mentions, 1.0, 1.0)
            .await
            .unwrap();

        let mut ppr_scores = HashMap::new();
        ppr_scores.insert("rust".to_string(), 0.5);
        ppr_scores.insert("memory_safety".to_string(), 0.5);

        let ranked = graph.rank_chunks_by_ppr(&ppr_scores, 10).await.unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].0, chunk_1);
        assert!((ranked[0].1 - 1.0).abs() < f32::EPSILON);
        assert_eq!(ranked[1].0, chunk_2);
        assert!((ranked[1].1 - 0.5).abs() < f32::EPSILON);
        assert!(ranked[0].1 > ranked[1].1);
    }

    #[tokio::test]
    async fn rank_chunks_by_ppr_truncates_to_top_k() {
        let graph = InMemoryGraph::new();
        let chunks: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        for chunk_id in &chunks {
            graph
                .add_edge(&chunk_id.to_string(), "rust", EdgeType::Mentions, 1.0, 1.0)
                .await
                .unwrap();
        }
        let mut ppr_scores = HashMap::new();
        ppr_scores.insert("rust".to_string(), 1.0);
        let ranked = graph.rank_chunks_by_ppr(&ppr_scores, 2).await.unwrap();
        assert_eq!(ranked.len(), 2);
    }

    #[tokio::test]
    async fn snapshot_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        let graph = InMemoryGraph::open(&path).unwrap();
        graph.add_entity(entity("rust")).await.unwrap();
        graph
            .add_edge("rust", "memory_safety", EdgeType::RelatedTo, 1.0, 1.0)
            .await
            .unwrap();
        graph.snapshot().unwrap();

        let reloaded = InMemoryGraph::open(&path).unwrap();
        let e = reloaded.get_entity("rust").await.unwrap();
        assert!(e.is_some());
        let edges = reloaded.edges_from("rust").await.unwrap();
        assert_eq!(edges.len(), 1);
    }
}
