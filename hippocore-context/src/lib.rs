//! # RetrievalCore for the hippocore memory engine
//!
//! The five named pipeline steps ([`pipeline`]) are pure functions,
//! unit-tested without a live index. [`mode`] classifies a query into
//! one of three interaction modes; [`routing`] decides which tiers a
//! query should consult; [`retrieval_core`] is the orchestrator that
//! wires mode detection, routing, parallel RECALL against
//! `hippocore_core::traits::{VectorIndex, GraphIndex}`, and the
//! pipeline steps into one `retrieve()` call, returning a
//! [`types::RetrievalResponse`] alongside the [`hippocore_core::types::QueryTrace`]
//! that recorded it.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hippocore_context::prelude::*;
//!
//! # async fn example(core: RetrievalCore) -> hippocore_core::error::Result<()> {
//! let (response, trace) = core.retrieve("what led to the outage?", None, None).await?;
//! println!("mode={} core_chunks={}", response.mode, response.core.len());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod mode;
pub mod pipeline;
pub mod prelude;
pub mod retrieval_core;
pub mod routing;
pub mod types;

pub use error::{ContextError, Result};
pub use retrieval_core::RetrievalCore;
pub use types::RetrievalResponse;
