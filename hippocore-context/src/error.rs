//! Error taxonomy for the retrieval core.
//!
//! Mirrors `hippocore_graph::error`/`hippocore_memory::error`: a flat
//! `thiserror` enum, `#[from]` conversions for upstream errors, and a
//! `From<String>`/`From<&str>` pair for ad hoc messages. Converts into
//! [`hippocore_core::HippoError`] at the crate boundary so
//! `hippocore-server` sees one error type regardless of which component
//! produced it.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("vector tier failed: {0}")]
    VectorTierFailed(String),

    #[error("retrieval cancelled after exceeding latency budget")]
    LatencyBudgetExceeded,

    #[error(transparent)]
    Core(#[from] hippocore_core::HippoError),
}

impl From<String> for ContextError {
    fn from(message: String) -> Self {
        Self::InvalidQuery(message)
    }
}

impl From<&str> for ContextError {
    fn from(message: &str) -> Self {
        Self::InvalidQuery(message.to_string())
    }
}

impl From<ContextError> for hippocore_core::HippoError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Core(inner) => inner,
            ContextError::VectorTierFailed(msg) => Self::SystemError(msg),
            ContextError::LatencyBudgetExceeded => {
                Self::Timeout("retrieval exceeded latency budget".to_string())
            }
            ContextError::InvalidQuery(msg) => Self::InvalidInput(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, ContextError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_conversions_land_as_invalid_query() {
        let err: ContextError = "empty query".into();
        assert!(matches!(err, ContextError::InvalidQuery(_)));
    }

    #[test]
    fn converts_into_hippo_error() {
        let err = ContextError::VectorTierFailed("hnsw down".to_string());
        let core: hippocore_core::HippoError = err.into();
        assert!(matches!(core, hippocore_core::HippoError::SystemError(_)));
    }
}
