//! Query routing (§4.5.2).
//!
//! Grounded on `llmspell-context::retrieval::strategy::StrategySelector`'s
//! ordered `check_*_rule()` shape: each routing rule is its own method
//! returning `Option<RoutingDecision>`, tried in order of specificity,
//! with a default fallback at the end. Generalized from the teacher's
//! five `RetrievalStrategy` variants to the spec's store-selection
//! table.

use hippocore_core::types::ModeProfile;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// A store (or store combination) the pipeline can query (§4.5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Vector,
    Graph,
    /// Multi-hop PPR expansion beyond the immediate neighborhood.
    GraphMultiHop,
    /// Reserved: omitted per design notes open question #2. Never
    /// produced by [`route`] today; kept so a future probabilistic
    /// tier is a non-breaking addition to the fusion loop.
    #[allow(dead_code)]
    Bayesian,
}

/// The outcome of routing one query: which tiers to consult, and a
/// human-readable log of why, recorded verbatim in the trace.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub tiers: Vec<Tier>,
    pub routing_log: String,
}

static SIMPLE_PREFERENCE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^what'?s\s+my\s+\w").unwrap());

static MULTIHOP_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bwhat\s+led\s+to\b|\bhow\s+did\b.*\bhappen\b|\bchain\s+of\s+events\b|\bmulti-?hop\b")
        .unwrap()
});

static PROBABILISTIC_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bP\s*\([^|()]+\|[^()]+\)|\bprobability\s+of\b.*\bgiven\b").unwrap());

static RELATIONAL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\brelated\s+to\b|\bconnected\s+to\b|\bcaused\s+by\b|\bbecause\s+of\b|\blinked\s+to\b").unwrap()
});

static ENTITY_LIKE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z][a-zA-Z0-9]*|[a-z][a-z0-9]*_[a-z0-9_]+)\b").unwrap());

fn check_simple_preference(query: &str) -> Option<RoutingDecision> {
    SIMPLE_PREFERENCE_PATTERN.is_match(query).then(|| RoutingDecision {
        // The key-value store this pattern is meant for is out of
        // scope (§1 Non-goals); fall back to whatever this engine
        // actually has rather than returning nothing.
        tiers: vec![Tier::Vector],
        routing_log: "simple_preference_kv_store_out_of_scope_fallback_vector".to_string(),
    })
}

fn check_multihop(query: &str, is_execution: bool) -> Option<RoutingDecision> {
    if !MULTIHOP_PATTERN.is_match(query) {
        return None;
    }
    // A matched multi-hop cue is by definition an explicit requirement
    // for the expensive tier, so execution mode does not suppress it
    // here (§4.5.2: "unless the query explicitly requires them").
    let _ = is_execution;
    Some(RoutingDecision {
        tiers: vec![Tier::Vector, Tier::Graph, Tier::GraphMultiHop],
        routing_log: "explicit_multihop_cue_vector_graph_multihop".to_string(),
    })
}

fn check_probabilistic(query: &str) -> Option<RoutingDecision> {
    PROBABILISTIC_PATTERN.is_match(query).then(|| RoutingDecision {
        tiers: vec![Tier::Vector, Tier::Graph],
        routing_log: "probabilistic_query_bayesian_tier_absent_fallback_vector_graph".to_string(),
    })
}

fn check_relational_entities(query: &str) -> Option<RoutingDecision> {
    let has_relational_wording = RELATIONAL_PATTERN.is_match(query);
    let has_entity_like_token = ENTITY_LIKE_PATTERN.is_match(query);
    (has_relational_wording && has_entity_like_token).then(|| RoutingDecision {
        tiers: vec![Tier::Vector, Tier::Graph],
        routing_log: "named_entities_plus_relational_wording_vector_graph".to_string(),
    })
}

fn default_route(has_known_entities: bool) -> RoutingDecision {
    if has_known_entities {
        RoutingDecision {
            tiers: vec![Tier::Vector, Tier::Graph],
            routing_log: "default_vector_plus_graph_entities_found".to_string(),
        }
    } else {
        RoutingDecision {
            tiers: vec![Tier::Vector],
            routing_log: "default_vector_only_no_known_entities".to_string(),
        }
    }
}

/// Route a query to the stores it should consult (§4.5.2).
///
/// `has_known_entities` tells the default-case rule whether entity
/// extraction yielded at least one node the graph already knows about
/// (computed by the caller, since this module has no graph access).
#[must_use]
pub fn route(query: &str, mode: &ModeProfile, mode_confidence: f32, has_known_entities: bool) -> RoutingDecision {
    // Mode confidence below 0.5 is treated as execution for routing
    // purposes regardless of the detected mode name (§4.5.2).
    let is_execution = mode.name == "execution" || mode_confidence < 0.5;

    let decision = check_simple_preference(query)
        .or_else(|| check_multihop(query, is_execution))
        .or_else(|| check_probabilistic(query))
        .or_else(|| check_relational_entities(query))
        .unwrap_or_else(|| default_route(has_known_entities));

    debug!(
        mode = mode.name,
        mode_confidence,
        routing = decision.routing_log,
        tiers = ?decision.tiers,
        "query routed"
    );
    decision
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec() -> ModeProfile {
        ModeProfile::execution()
    }
    fn planning() -> ModeProfile {
        ModeProfile::planning()
    }

    #[test]
    fn simple_preference_routes_to_vector_only() {
        let decision = route("what's my favorite editor?", &exec(), 1.0, false);
        assert_eq!(decision.tiers, vec![Tier::Vector]);
    }

    #[test]
    fn multihop_cue_routes_to_vector_graph_multihop() {
        let decision = route("what led to the outage last week?", &planning(), 1.0, true);
        assert_eq!(decision.tiers, vec![Tier::Vector, Tier::Graph, Tier::GraphMultiHop]);
    }

    #[test]
    fn probabilistic_query_falls_back_to_vector_graph() {
        let decision = route("P(failure | deploy) this week?", &planning(), 1.0, true);
        assert_eq!(decision.tiers, vec![Tier::Vector, Tier::Graph]);
    }

    #[test]
    fn relational_entities_route_to_vector_graph() {
        let decision = route("how is HashMap related to VecDeque internals?", &planning(), 1.0, true);
        assert_eq!(decision.tiers, vec![Tier::Vector, Tier::Graph]);
    }

    #[test]
    fn default_with_known_entities_adds_graph() {
        let decision = route("tell me about the onboarding doc", &planning(), 1.0, true);
        assert_eq!(decision.tiers, vec![Tier::Vector, Tier::Graph]);
    }

    #[test]
    fn default_without_known_entities_is_vector_only() {
        let decision = route("tell me about the onboarding doc", &planning(), 1.0, false);
        assert_eq!(decision.tiers, vec![Tier::Vector]);
    }

    #[test]
    fn low_confidence_is_treated_as_execution() {
        let decision = route("what led to this?", &planning(), 0.2, true);
        // Still honored: the multi-hop cue is an explicit requirement.
        assert_eq!(decision.tiers, vec![Tier::Vector, Tier::Graph, Tier::GraphMultiHop]);
    }
}
