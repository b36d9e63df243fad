//! # Entity/chunk graph for the hippocore memory engine
//!
//! A single-process knowledge graph over entities and chunk nodes
//! (§4.4): entity mentions extracted from chunk text are linked by
//! `mentions`/`co_occurs_with`/`related_to`/`similar_to` edges, and
//! `personalized_pagerank` ranks the subgraph reachable from a seed
//! set so the retrieval pipeline can turn an entity match into a
//! ranked list of chunks.
//!
//! Unlike the distributed, multi-tenant bi-temporal graph this crate
//! started from, there is one graph per engine instance: it lives in
//! memory for the process lifetime and snapshots to a single JSON file
//! on request (see [`storage::InMemoryGraph`]).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hippocore_graph::prelude::*;
//!
//! # async fn example() -> hippocore_core::error::Result<()> {
//! let graph = InMemoryGraph::new();
//! let extractor = RegexExtractor::new();
//!
//! for mention in extractor.extract("Rust is a systems programming language.") {
//!     let entity_id = RegexExtractor::normalize(&mention.surface);
//!     graph
//!         .add_entity(Entity::new(entity_id, mention.surface, mention.entity_type))
//!         .await?;
//! }
//!
//! let scores = graph
//!     .personalized_pagerank(&["rust".to_string()], 0.85, 100, 1e-6)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod extraction;
pub mod prelude;
pub mod storage;

pub use storage::InMemoryGraph;
