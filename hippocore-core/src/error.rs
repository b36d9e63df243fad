//! Error taxonomy shared across the engine.
//!
//! One flat enum covering every kind named in the error-handling design:
//! callers match on variant, not on message text. Crates further down the
//! stack (`hippocore-graph`, `hippocore-memory`, ...) define their own
//! narrower error enums and convert into this one at their public
//! boundary via `#[from]`, the same layering the teacher's crates use
//! between `LLMSpellError` and each subsystem's own error type.

use thiserror::Error;

/// Every recoverable or surfaced failure mode in the engine.
#[derive(Error, Debug)]
pub enum HippoError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("index degraded: {0}")]
    IndexDegraded(String),

    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("replay unavailable: {0}")]
    ReplayUnavailable(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("system error: {0}")]
    SystemError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl From<String> for HippoError {
    fn from(message: String) -> Self {
        Self::SystemError(message)
    }
}

impl From<&str> for HippoError {
    fn from(message: &str) -> Self {
        Self::SystemError(message.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HippoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_conversions_land_as_system_error() {
        let err: HippoError = "boom".into();
        assert!(matches!(err, HippoError::SystemError(_)));
        let err: HippoError = String::from("boom").into();
        assert!(matches!(err, HippoError::SystemError(_)));
    }

    #[test]
    fn variants_carry_their_message() {
        let err = HippoError::NotFound("chunk-1".to_string());
        assert_eq!(err.to_string(), "not found: chunk-1");
    }
}
