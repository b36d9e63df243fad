//! # QueryTrace store, replay, and failure attribution (§4.7)
//!
//! Every accepted query produces exactly one [`hippocore_core::types::QueryTrace`],
//! written before the response is returned to the caller — this crate is
//! where that trace lives. Three pieces:
//!
//! - [`store`]: an append-only `libsql` table, one row per trace, plus a
//!   retention sweep and a windowed statistics query.
//! - [`replay`]: re-run a traced query against the live indices and diff
//!   the new result against the original, failing with
//!   [`error::TraceError::ReplayUnavailable`] when the original chunks
//!   are gone rather than silently producing a different answer.
//! - [`attribution`]: classify a failed trace as `context_bug`,
//!   `model_bug`, or `system_error`, including the one mechanically
//!   detectable context-bug subcategory the spec names: wrong-lifecycle
//!   (an archived/demoted/rehydratable chunk answering a query that
//!   asked for something current).
//!
//! No teacher crate owns this subsystem directly; [`store::TraceStore`]
//! is grounded on the surrounding crates' append-only-store conventions
//! (`hippocore_memory::vector_index`'s WAL-backed store, same
//! snapshot-plus-durable-log shape minus the WAL since `libsql` already
//! gives this crate durability), and [`replay`] is grounded on
//! `llmspell-graph`'s `TemporalQuery` "read as of a point in time"
//! pattern, simplified to this engine's single-process scope: a replay
//! is reconstructible exactly when every chunk the original trace
//! returned is still present in the live vector index.

pub mod attribution;
pub mod error;
pub mod prelude;
pub mod replay;
pub mod store;

pub use error::{Result, TraceError};
pub use store::TraceStore;
