//! Crate-local error helpers.
//!
//! Unlike the teacher's `llmspell-memory::error`, this crate has no
//! error variants of its own beyond what `hippocore_core::HippoError`
//! already carries (`IndexDegraded`, `IndexUnavailable`,
//! `ModelUnavailable`) — every public operation here implements a trait
//! from `hippocore-core` whose signature already fixes the error type.
//! This module exists to name the mapping from low-level failures onto
//! those variants in one place rather than inline at each call site.

use hippocore_core::error::HippoError;

/// A WAL replay or segment read failed in a way recovery can't paper
/// over (§4.3 failure modes: "WAL corruption -> fail open ... surface
/// `IndexDegraded`").
pub fn index_degraded(context: impl std::fmt::Display) -> HippoError {
    HippoError::IndexDegraded(context.to_string())
}

/// The embedding capability could not be reached or refused the
/// request (§4.2: "model unavailable -> fail with `ModelUnavailable`").
pub fn model_unavailable(context: impl std::fmt::Display) -> HippoError {
    HippoError::ModelUnavailable(context.to_string())
}
