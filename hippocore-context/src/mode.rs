//! Mode detection (§4.5.1).
//!
//! Grounded on `llmspell-context::query::analyzer::RegexQueryAnalyzer`'s
//! `LazyLock<Vec<(Regex, T)>>` catalogue-classifier shape, generalized
//! from a single early-exit intent match to a three-way weighted-count
//! classifier. Unlike the teacher's fixed `INTENT_PATTERNS` static, the
//! catalogue here is a plain, `serde`-deserializable struct
//! ([`ModeCatalogue`]) so it can be loaded from a file and edited
//! without recompilation; [`ModeCatalogue::default`] ships the
//! canonical ~29-pattern set compiled in.

use hippocore_core::types::ModeProfile;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// One regex pattern and its contribution to a mode's score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternSpec {
    pub pattern: String,
    pub weight: f32,
}

impl PatternSpec {
    fn new(pattern: &str, weight: f32) -> Self {
        Self {
            pattern: pattern.to_string(),
            weight,
        }
    }
}

/// The editable catalogue of mode patterns, grouped by mode (§4.5.1).
/// A versioned schema: `version` is bumped whenever the pattern set
/// changes shape, so a stored catalogue on disk can be checked for
/// compatibility before being loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeCatalogue {
    pub version: u32,
    pub execution: Vec<PatternSpec>,
    pub planning: Vec<PatternSpec>,
    pub brainstorming: Vec<PatternSpec>,
}

impl Default for ModeCatalogue {
    fn default() -> Self {
        Self {
            version: 1,
            execution: vec![
                PatternSpec::new(r"(?i)\bfix(?:es|ed|ing)?\b", 1.0),
                PatternSpec::new(r"(?i)\bimplement(?:s|ed|ing)?\b", 1.0),
                PatternSpec::new(r"(?i)\bdebug(?:s|ged|ging)?\b", 1.0),
                PatternSpec::new(r"(?i)\brun\b|\brunning\b", 1.0),
                PatternSpec::new(r"(?i)\bexecute[sd]?\b", 1.0),
                PatternSpec::new(r"(?i)\berror[s]?\b", 1.0),
                PatternSpec::new(r"(?i)\bfail(?:s|ed|ing)?\b", 1.0),
                PatternSpec::new(r"(?i)\btest(?:s|ed|ing)?\b", 0.8),
                PatternSpec::new(r"(?i)\bdeploy(?:s|ed|ing)?\b", 1.0),
                PatternSpec::new(r"^(?i)what'?s\s+my\b", 1.2),
                PatternSpec::new(r"(?i)\bright\s+now\b", 0.8),
                PatternSpec::new(r"(?i)^what(?:'?s| is| are)\b", 1.0),
            ],
            planning: vec![
                PatternSpec::new(r"(?i)\bplan(?:s|ned|ning)?\b", 1.0),
                PatternSpec::new(r"(?i)\bshould\s+we\b", 1.0),
                PatternSpec::new(r"(?i)\broadmap\b", 1.0),
                PatternSpec::new(r"(?i)\bstrategy\b", 1.0),
                PatternSpec::new(r"(?i)\bwhat\s+led\s+to\b", 1.2),
                PatternSpec::new(r"(?i)\bnext\s+steps?\b", 1.0),
                PatternSpec::new(r"(?i)\btrade-?offs?\b", 1.0),
                PatternSpec::new(r"(?i)\bmigrat(?:e|es|ed|ing|ion)\b", 0.8),
                PatternSpec::new(r"(?i)\bdecide[sd]?\b", 0.8),
            ],
            brainstorming: vec![
                PatternSpec::new(r"(?i)\bbrainstorm(?:s|ed|ing)?\b", 1.2),
                PatternSpec::new(r"(?i)\bideas?\b", 1.0),
                PatternSpec::new(r"(?i)\bwhat\s+if\b", 1.0),
                PatternSpec::new(r"(?i)\bimagine\b", 1.0),
                PatternSpec::new(r"(?i)\bcould\s+we\b", 1.0),
                PatternSpec::new(r"(?i)\bexplore\b", 0.8),
                PatternSpec::new(r"(?i)\balternatives?\b", 1.0),
                PatternSpec::new(r"(?i)\bpossibilit(?:y|ies)\b", 0.8),
                PatternSpec::new(r"(?i)\bthinking\s+out\s+loud\b", 1.2),
            ],
        }
    }
}

struct CompiledMode {
    name: &'static str,
    patterns: Vec<(Regex, f32)>,
}

/// Compiled, queryable form of a [`ModeCatalogue`] (§4.5.1).
pub struct ModeDetector {
    modes: Vec<CompiledMode>,
}

/// Confidence below this floor is treated as "mode detection returned
/// nothing" and falls back to execution (§4.5.1, §4.5.5).
const MIN_CONFIDENCE: f32 = 0.3;

impl ModeDetector {
    /// Compile a catalogue. Fails only if a pattern in the catalogue is
    /// not valid regex syntax — the caller decides whether that's fatal
    /// or worth falling back to [`ModeCatalogue::default`].
    pub fn new(catalogue: &ModeCatalogue) -> Result<Self, regex::Error> {
        let compile = |name: &'static str, specs: &[PatternSpec]| -> Result<CompiledMode, regex::Error> {
            let patterns = specs
                .iter()
                .map(|spec| Regex::new(&spec.pattern).map(|re| (re, spec.weight)))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(CompiledMode { name, patterns })
        };
        Ok(Self {
            modes: vec![
                compile("execution", &catalogue.execution)?,
                compile("planning", &catalogue.planning)?,
                compile("brainstorming", &catalogue.brainstorming)?,
            ],
        })
    }

    /// Detect `(mode_profile, confidence)` for a query. An explicit
    /// override short-circuits detection entirely (§4.5.1 input).
    #[must_use]
    pub fn detect(&self, query: &str, explicit_override: Option<&str>) -> (ModeProfile, f32) {
        if let Some(name) = explicit_override {
            if let Some(profile) = ModeProfile::by_name(name) {
                debug!(mode = name, "mode set by explicit override");
                return (profile, 1.0);
            }
        }

        let scores: Vec<(&'static str, f32)> = self
            .modes
            .iter()
            .map(|mode| {
                let score: f32 = mode
                    .patterns
                    .iter()
                    .filter(|(re, _)| re.is_match(query))
                    .map(|(_, weight)| *weight)
                    .sum();
                trace!(mode = mode.name, score, "mode pattern score");
                (mode.name, score)
            })
            .collect();

        let total: f32 = scores.iter().map(|(_, s)| s).sum();

        // Ties (including the all-zero case) favor execution: scan in
        // catalogue order (execution first) and keep strict `>` so an
        // equal or lower later score never displaces it.
        let mut winner = scores[0];
        for &(name, score) in &scores[1..] {
            if score > winner.1 {
                winner = (name, score);
            }
        }

        let confidence = if total > 0.0 { winner.1 / total } else { 0.0 };

        if confidence < MIN_CONFIDENCE {
            warn!(confidence, "mode confidence below floor, defaulting to execution");
            return (ModeProfile::execution(), MIN_CONFIDENCE);
        }

        debug!(mode = winner.0, confidence, "mode detected");
        let profile = ModeProfile::by_name(winner.0).unwrap_or_else(ModeProfile::execution);
        (profile, confidence)
    }
}

impl Default for ModeDetector {
    fn default() -> Self {
        Self::new(&ModeCatalogue::default()).expect("default catalogue must compile")
    }
}
