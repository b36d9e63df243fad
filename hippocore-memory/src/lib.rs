//! Chunking, embedding, vector indexing, and lifecycle management for
//! the hippocore memory engine.
//!
//! This crate owns everything that touches a chunk's text and its
//! position in the forgetting/compression state machine (§4.1, §4.2,
//! §4.3, §4.6): splitting a document into chunk drafts, turning text
//! into vectors, storing those vectors in a searchable index, and
//! periodically demoting/archiving chunks that have gone unused.

pub mod chunker;
pub mod config;
pub mod embedder;
pub mod error;
pub mod lifecycle;
pub mod prelude;
pub mod vector_index;

pub use chunker::Chunker;
pub use embedder::ReferenceEmbedder;
pub use lifecycle::LifecycleManager;
pub use vector_index::HnswVectorIndex;
