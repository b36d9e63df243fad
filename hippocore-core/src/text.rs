//! Small text utilities shared by the entity extractor and mode
//! detector. Ported here (rather than a dedicated utils crate) because
//! the only retrievable artifact of the teacher's `llmspell-utils` was
//! its call sites (`is_stopword` used by both `RegexExtractor` and
//! `RegexQueryAnalyzer`), not its implementation.

pub mod stopwords {
    use std::collections::HashSet;
    use std::sync::LazyLock;

    static STOPWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
        [
            "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "do", "does",
            "did", "doing", "i", "you", "he", "she", "it", "we", "they", "me", "him", "her",
            "us", "them", "my", "your", "his", "its", "our", "their", "this", "that", "these",
            "those", "and", "or", "but", "if", "in", "on", "at", "by", "for", "with", "about",
            "to", "of", "from", "as", "into", "like", "through", "over", "before", "after",
            "between", "out", "up", "down", "off", "again", "further", "then", "once", "so",
            "than", "too", "very", "can", "will", "just", "should", "now", "what", "which",
            "who", "whom", "how", "why", "when", "where", "not", "no",
        ]
        .iter()
        .copied()
        .collect()
    });

    /// Case-insensitive stopword check (the teacher's call sites
    /// capitalize the token first; this accepts any case).
    #[must_use]
    pub fn is_stopword(word: &str) -> bool {
        STOPWORDS.contains(word.to_lowercase().as_str())
    }
}

/// Deterministic entity-surface normalizer: lowercase, strip
/// punctuation, collapse whitespace to underscore (§4.4: two surfaces
/// that normalize equal are the same entity).
///
/// Free function rather than a method so it is callable through a
/// `dyn EntityExtractor` trait object, which cannot carry a `Self:
/// Sized` associated function. `EntityExtractor::normalize`'s default
/// body delegates here.
#[must_use]
pub fn normalize_entity_surface(surface: &str) -> String {
    let lowered = surface.to_lowercase();
    let stripped: String = lowered
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join("_")
}
