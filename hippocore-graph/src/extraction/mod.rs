//! Entity extraction from chunk text (§4.4a).
//!
//! # Extractors
//!
//! - [`RegexExtractor`]: pattern-based extraction using regular expressions.

pub mod regex;

pub use regex::RegexExtractor;
