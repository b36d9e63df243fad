//! Common imports for the context crate.

pub use crate::mode::{ModeCatalogue, ModeDetector};
pub use crate::retrieval_core::RetrievalCore;
pub use crate::routing::{route, RoutingDecision, Tier};
pub use crate::types::RetrievalResponse;
pub use crate::{ContextError, Result};
