//! Common imports for the trace crate.

pub use crate::attribution::{attribute, is_wrong_lifecycle, Attribution};
pub use crate::replay::{replay, ReplayOutcome, StructuralDiff};
pub use crate::store::{TraceStats, TraceStore};
pub use crate::{Result, TraceError};
