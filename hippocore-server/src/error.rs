//! Error type for the tool dispatcher and engine handle.
//!
//! Follows the same flat-enum-with-`#[from]` shape as every other
//! crate in this workspace (`hippocore_trace::error`,
//! `hippocore_context::error`): one variant per upstream crate's error
//! type, plus a catch-all for malformed caller input that has no
//! upstream source.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Core(#[from] hippocore_core::HippoError),

    #[error(transparent)]
    Context(#[from] hippocore_context::ContextError),

    #[error(transparent)]
    Trace(#[from] hippocore_trace::TraceError),
}

impl From<String> for ServerError {
    fn from(message: String) -> Self {
        Self::InvalidArguments(message)
    }
}

impl From<&str> for ServerError {
    fn from(message: &str) -> Self {
        Self::InvalidArguments(message.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_conversion_is_invalid_arguments() {
        let err: ServerError = "bad shape".into();
        assert!(matches!(err, ServerError::InvalidArguments(_)));
    }

    #[test]
    fn core_error_converts_through_from() {
        let core_err = hippocore_core::HippoError::NotFound("chunk".to_string());
        let err: ServerError = core_err.into();
        assert!(matches!(err, ServerError::Core(_)));
    }
}
