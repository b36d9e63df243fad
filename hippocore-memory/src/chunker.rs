//! C1: max-min semantic chunking (§4.1).
//!
//! Grounded on `llmspell-rag::chunking::strategies::SlidingWindowChunker`'s
//! boundary-detection-then-accumulate architecture (paragraph/sentence
//! boundary search, byte-offset bookkeeping, overlap carried forward),
//! adapted from a fixed-size sliding window to the spec's max-min
//! windowing: accumulate markdown blocks until the window falls in
//! `[min_tokens, max_tokens]`, with code blocks and frontmatter treated
//! as atomic units rather than arbitrary boundary search.

use crate::config::ChunkerConfig;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// `(text) -> token count` capability. Defaults to the teacher's
/// `text.len() / 4` heuristic (§4.1a) when none is supplied; a real
/// tokenizer can be plugged in without changing the chunking algorithm.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

struct ByteHeuristicCounter;

impl TokenCounter for ByteHeuristicCounter {
    fn count_tokens(&self, text: &str) -> usize {
        text.len().div_ceil(4)
    }
}

/// An un-embedded, un-indexed chunk produced by the chunker. `chunk_id`
/// is derived from `(source_path, chunk_index, content_hash)` so
/// re-chunking identical text yields identical ids (§8 duplicate-
/// ingestion boundary behavior).
#[derive(Debug, Clone)]
pub struct ChunkDraft {
    pub chunk_id: Uuid,
    pub text: String,
    pub chunk_index: usize,
    pub source_path: String,
    pub content_hash: String,
    /// `Some("frontmatter")` for the leading YAML/TOML block (§4.1).
    pub kind: Option<String>,
}

/// A source document handed to the chunker.
pub struct Document<'a> {
    pub path: &'a str,
    pub text: &'a str,
}

static FRONTMATTER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\A-{3}\n(.*?)\n-{3}\n").unwrap());

static CODE_FENCE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[^\n]*\n.*?\n```").unwrap());

static HEADING_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^#{1,6}\s").unwrap());

enum Block {
    /// A fenced code block: never split, regardless of its length.
    Code(String),
    /// Ordinary prose, already split on blank-line paragraph breaks.
    Paragraph(String),
}

/// Splits markdown documents into semantically coherent chunk drafts
/// (§4.1).
pub struct Chunker {
    config: ChunkerConfig,
    token_counter: Box<dyn TokenCounter>,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

impl Chunker {
    #[must_use]
    pub fn new(config: ChunkerConfig) -> Self {
        Self {
            config,
            token_counter: Box::new(ByteHeuristicCounter),
        }
    }

    #[must_use]
    pub fn with_token_counter(mut self, counter: Box<dyn TokenCounter>) -> Self {
        self.token_counter = counter;
        self
    }

    fn count_tokens(&self, text: &str) -> usize {
        self.token_counter.count_tokens(text)
    }

    /// Produce the ordered sequence of chunk drafts for a document.
    /// Returns the drafts plus a list of non-fatal diagnostics — a
    /// partial sequence is always preferred over aborting the whole
    /// document (§4.1 failure semantics).
    #[must_use]
    pub fn chunk(&self, document: &Document<'_>) -> (Vec<ChunkDraft>, Vec<String>) {
        let mut diagnostics = Vec::new();

        if document.text.is_empty() {
            debug!(path = document.path, "empty document, emitting no chunks");
            return (Vec::new(), diagnostics);
        }

        if is_probably_binary(document.text) {
            warn!(path = document.path, "binary content detected, soft failure");
            diagnostics.push("binary content: emitted no chunks".to_string());
            return (Vec::new(), diagnostics);
        }

        let mut drafts = Vec::new();
        let mut chunk_index = 0usize;
        let mut rest = document.text;

        if let Some(caps) = FRONTMATTER_PATTERN.captures(document.text) {
            let whole = caps.get(0).unwrap();
            let body = caps.get(1).unwrap().as_str();
            drafts.push(self.make_draft(document.path, chunk_index, body, Some("frontmatter")));
            chunk_index += 1;
            rest = &document.text[whole.end()..];
        }

        let blocks = split_into_blocks(rest);
        let mut window = String::new();

        let flush = |window: &mut String, chunker: &Self, index: &mut usize, out: &mut Vec<ChunkDraft>| {
            let trimmed = window.trim();
            if !trimmed.is_empty() {
                out.push(chunker.make_draft(document.path, *index, trimmed, None));
                *index += 1;
            }
            window.clear();
        };

        for block in blocks {
            match block {
                Block::Code(code) => {
                    let code_tokens = self.count_tokens(&code);
                    if code_tokens > self.config.max_tokens {
                        trace!(code_tokens, "oversized code block emitted atomically");
                    }
                    // Code blocks never split mid-block, even if the
                    // current window isn't full: close the window first,
                    // then emit the code block as its own draft.
                    flush(&mut window, self, &mut chunk_index, &mut drafts);
                    drafts.push(self.make_draft(document.path, chunk_index, &code, None));
                    chunk_index += 1;
                }
                Block::Paragraph(paragraph) => {
                    if paragraph.trim().is_empty() {
                        continue;
                    }
                    let candidate_tokens = self.count_tokens(&window) + self.count_tokens(&paragraph);
                    if candidate_tokens > self.config.max_tokens && !window.trim().is_empty() {
                        let overlap = tail_overlap(&window, self.config.overlap_tokens);
                        flush(&mut window, self, &mut chunk_index, &mut drafts);
                        window.push_str(&overlap);
                    }
                    if !window.is_empty() {
                        window.push_str("\n\n");
                    }
                    window.push_str(&paragraph);

                    if self.count_tokens(&window) >= self.config.min_tokens
                        && self.count_tokens(&window) >= self.config.max_tokens
                    {
                        flush(&mut window, self, &mut chunk_index, &mut drafts);
                    }
                }
            }
        }
        flush(&mut window, self, &mut chunk_index, &mut drafts);

        debug!(
            path = document.path,
            chunks = drafts.len(),
            "chunked document"
        );
        (drafts, diagnostics)
    }

    fn make_draft(&self, source_path: &str, chunk_index: usize, text: &str, kind: Option<&str>) -> ChunkDraft {
        let content_hash = content_hash(text);
        let chunk_id = hippocore_core::types::Chunk::derive_id(source_path, chunk_index, &content_hash);
        ChunkDraft {
            chunk_id,
            text: text.to_string(),
            chunk_index,
            source_path: source_path.to_string(),
            content_hash,
            kind: kind.map(str::to_string),
        }
    }
}

fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Rough binary-content heuristic: too many non-printable,
/// non-whitespace bytes in the first few KB.
fn is_probably_binary(text: &str) -> bool {
    let sample: &str = &text[..text.len().min(8192)];
    let total = sample.chars().count();
    if total == 0 {
        return false;
    }
    let control = sample
        .chars()
        .filter(|c| c.is_control() && *c != '\n' && *c != '\r' && *c != '\t')
        .count();
    (control as f64 / total as f64) > 0.05
}

/// Split text on headings, fenced code blocks, and paragraph breaks.
fn split_into_blocks(text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut cursor = 0usize;

    let code_matches: Vec<_> = CODE_FENCE_PATTERN.find_iter(text).collect();
    for m in code_matches {
        if m.start() > cursor {
            blocks.extend(split_prose(&text[cursor..m.start()]));
        }
        blocks.push(Block::Code(m.as_str().to_string()));
        cursor = m.end();
    }
    if cursor < text.len() {
        blocks.extend(split_prose(&text[cursor..]));
    }
    blocks
}

fn split_prose(text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    for raw_paragraph in text.split("\n\n") {
        let paragraph = raw_paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        // A heading starts its own paragraph so it never gets buried
        // mid-window; the accumulation loop still merges it with
        // neighbors up to max_tokens like any other paragraph.
        if HEADING_PATTERN.is_match(paragraph) {
            trace!("heading boundary: {}", paragraph.lines().next().unwrap_or(""));
        }
        blocks.push(Block::Paragraph(paragraph.to_string()));
    }
    blocks
}

/// Carry the trailing `overlap_tokens` worth of text from a closed
/// window into the next one (§4.1 step 3).
fn tail_overlap(window: &str, overlap_tokens: usize) -> String {
    let overlap_bytes = overlap_tokens * 4;
    if window.len() <= overlap_bytes {
        return window.to_string();
    }
    let start = window.len() - overlap_bytes;
    let mut boundary = start;
    while boundary < window.len() && !window.is_char_boundary(boundary) {
        boundary += 1;
    }
    let mut tail = window[boundary..].to_string();
    tail.push_str("\n\n");
    tail
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> Document<'_> {
        Document { path: "notes/a.md", text }
    }

    #[test]
    fn empty_document_yields_no_chunks() {
        let chunker = Chunker::default();
        let (drafts, diags) = chunker.chunk(&doc(""));
        assert!(drafts.is_empty());
        assert!(diags.is_empty());
    }

    #[test]
    fn binary_content_is_a_soft_failure() {
        let chunker = Chunker::default();
        let binary: String = (0u8..40).map(|b| (b % 5) as u8 as char).collect();
        let (drafts, diags) = chunker.chunk(&doc(&binary));
        assert!(drafts.is_empty());
        assert!(!diags.is_empty());
    }

    #[test]
    fn frontmatter_becomes_its_own_tagged_chunk() {
        let text = "---\ntitle: Notes\n---\n\nBody paragraph with enough content to count as real prose here.";
        let chunker = Chunker::default();
        let (drafts, _) = chunker.chunk(&doc(text));
        assert_eq!(drafts[0].kind.as_deref(), Some("frontmatter"));
        assert!(drafts[0].text.contains("title: Notes"));
    }

    #[test]
    fn oversized_code_block_is_emitted_whole_not_truncated() {
        let code_body = "fn main() {\n".to_string() + &"    println!(\"x\");\n".repeat(400) + "}";
        let text = format!("```rust\n{code_body}\n```");
        let chunker = Chunker::default();
        let (drafts, _) = chunker.chunk(&doc(&text));
        assert_eq!(drafts.len(), 1);
        assert!(drafts[0].text.contains("fn main"));
        assert!(drafts[0].text.contains("println"));
    }

    #[test]
    fn duplicate_ingestion_yields_same_chunk_id() {
        let text = "Some paragraph with identical content across two runs of the chunker.";
        let chunker = Chunker::default();
        let (first, _) = chunker.chunk(&doc(text));
        let (second, _) = chunker.chunk(&doc(text));
        assert_eq!(first[0].chunk_id, second[0].chunk_id);
    }

    #[test]
    fn window_accumulates_paragraphs_up_to_max_tokens() {
        let paragraphs: Vec<String> = (0..30)
            .map(|i| format!("Paragraph number {i} with a handful of words in it to add up tokens."))
            .collect();
        let text = paragraphs.join("\n\n");
        let chunker = Chunker::default();
        let (drafts, _) = chunker.chunk(&doc(&text));
        assert!(drafts.len() > 1, "should split into multiple windows");
        for d in &drafts {
            let tokens = d.text.len().div_ceil(4);
            assert!(tokens <= 512 + 50, "chunk exceeded max+overlap budget: {tokens}");
        }
    }
}
