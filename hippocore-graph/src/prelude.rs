//! Common imports for the graph crate.

pub use crate::extraction::RegexExtractor;
pub use crate::storage::InMemoryGraph;
pub use hippocore_core::traits::{EntityExtractor, ExtractedEntity, GraphIndex, ReachedNode};
pub use hippocore_core::types::{Edge, EdgeType, Entity, EntityType};
