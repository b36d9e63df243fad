//! The engine's declarative configuration document (§6).
//!
//! Layered the way `llmspell-memory::config::MemoryConfig` is: a plain
//! struct with `Default`, a `for_testing()` shortcut, and `with_*`
//! builder methods, loaded in practice (by `hippocore-server`) through
//! the `config` crate's default → file → env-var precedence chain.

use crate::types::ModeProfile;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub short_term_hours: i64,
    pub mid_term_days: i64,
    pub long_term_days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            short_term_hours: 24,
            mid_term_days: 7,
            long_term_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PprConfig {
    pub alpha: f32,
    pub max_iter: usize,
    pub tol: f32,
}

impl Default for PprConfig {
    fn default() -> Self {
        Self {
            alpha: 0.85,
            max_iter: 100,
            tol: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub embedding_dim: usize,
    pub retention: RetentionConfig,
    pub lifecycle_sweep_interval_hours: u64,
    pub ppr: PprConfig,
    #[serde(default)]
    pub mode_overrides: HashMap<String, ModeProfile>,
    pub trace_retention_days: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            embedding_dim: crate::types::EMBEDDING_DIM,
            retention: RetentionConfig::default(),
            lifecycle_sweep_interval_hours: 6,
            ppr: PprConfig::default(),
            mode_overrides: HashMap::new(),
            trace_retention_days: 30,
        }
    }
}

impl EngineConfig {
    /// A configuration tuned for fast, isolated tests: tmp data dir,
    /// sub-second sweep interval.
    #[must_use]
    pub fn for_testing(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            lifecycle_sweep_interval_hours: 0,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_data_dir(mut self, data_dir: PathBuf) -> Self {
        self.data_dir = data_dir;
        self
    }

    #[must_use]
    pub fn with_ppr(mut self, ppr: PprConfig) -> Self {
        self.ppr = ppr;
        self
    }

    /// Resolve a mode by name, honoring a configured override before
    /// falling back to the canonical profile (§3).
    #[must_use]
    pub fn resolve_mode(&self, name: &str) -> Option<ModeProfile> {
        self.mode_overrides
            .get(name)
            .cloned()
            .or_else(|| ModeProfile::by_name(name))
    }

    /// `embedding.dim` is fixed at init; refuse changes (§6).
    pub fn validate_embedding_dim(&self, requested: usize) -> crate::error::Result<()> {
        if requested != self.embedding_dim {
            return Err(crate::error::HippoError::InvalidInput(format!(
                "embedding dimension is fixed at {}; got {}",
                self.embedding_dim, requested
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.retention.short_term_hours, 24);
        assert_eq!(cfg.retention.mid_term_days, 7);
        assert_eq!(cfg.retention.long_term_days, 30);
        assert_eq!(cfg.lifecycle_sweep_interval_hours, 6);
        assert!((cfg.ppr.alpha - 0.85).abs() < f32::EPSILON);
        assert_eq!(cfg.ppr.max_iter, 100);
        assert_eq!(cfg.trace_retention_days, 30);
    }

    #[test]
    fn rejects_dimension_change() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate_embedding_dim(384).is_ok());
        assert!(cfg.validate_embedding_dim(768).is_err());
    }

    #[test]
    fn mode_override_takes_precedence() {
        let mut cfg = EngineConfig::default();
        let mut custom = ModeProfile::execution();
        custom.core_size = 7;
        cfg.mode_overrides.insert("execution".to_string(), custom);
        let resolved = cfg.resolve_mode("execution").unwrap();
        assert_eq!(resolved.core_size, 7);
    }
}
