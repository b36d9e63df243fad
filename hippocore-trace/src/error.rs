//! Error taxonomy for the trace store, replay, and attribution.
//!
//! Mirrors `hippocore_context::error`: a flat `thiserror` enum with
//! `#[from]` conversions, converting into [`hippocore_core::HippoError`]
//! at the crate boundary. The one variant genuinely new to this crate
//! is [`TraceError::Database`] — every other failure mode this crate
//! surfaces already has a home in `HippoError`'s closed set.

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("no trace recorded for query {0}")]
    NotFound(Uuid),

    #[error("cannot replay query {query_id}: {reason}")]
    ReplayUnavailable { query_id: Uuid, reason: String },

    #[error(transparent)]
    Database(#[from] libsql::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Context(#[from] hippocore_context::ContextError),

    #[error(transparent)]
    Core(#[from] hippocore_core::HippoError),
}

impl From<TraceError> for hippocore_core::HippoError {
    fn from(err: TraceError) -> Self {
        match err {
            TraceError::NotFound(id) => Self::NotFound(format!("trace {id}")),
            TraceError::ReplayUnavailable { query_id, reason } => {
                Self::ReplayUnavailable(format!("query {query_id}: {reason}"))
            }
            TraceError::Database(e) => Self::SystemError(e.to_string()),
            TraceError::Serialization(e) => Self::SystemError(e.to_string()),
            TraceError::Context(e) => e.into(),
            TraceError::Core(e) => e,
        }
    }
}

pub type Result<T> = std::result::Result<T, TraceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_converts_to_core_not_found() {
        let err = TraceError::NotFound(Uuid::nil());
        let core: hippocore_core::HippoError = err.into();
        assert!(matches!(core, hippocore_core::HippoError::NotFound(_)));
    }

    #[test]
    fn replay_unavailable_converts_to_core_replay_unavailable() {
        let err = TraceError::ReplayUnavailable {
            query_id: Uuid::nil(),
            reason: "source data deleted".to_string(),
        };
        let core: hippocore_core::HippoError = err.into();
        assert!(matches!(core, hippocore_core::HippoError::ReplayUnavailable(_)));
    }
}
