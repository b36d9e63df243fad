//! Convenience re-exports for downstream crates.

pub use crate::chunker::{ChunkDraft, Chunker, Document, TokenCounter};
pub use crate::config::{ChunkerConfig, HnswIndexConfig};
pub use crate::embedder::ReferenceEmbedder;
pub use crate::lifecycle::{FilesystemSourceReader, LifecycleManager, SourceReader, SweepStats, Summarizer, TruncatingSummarizer};
pub use crate::vector_index::HnswVectorIndex;
pub use hippocore_core::traits::{Embedder, MetadataFilter, VectorHit, VectorIndex};
