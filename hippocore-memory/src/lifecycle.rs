//! C6: `LifecycleManager` — the periodic stage-transition sweep and the
//! on-access rehydration path (§4.6).
//!
//! The background-task shape (`tokio::sync::watch` shutdown signal,
//! `Arc<AtomicBool>` running flag, `tokio::select!` loop) is grounded on
//! `llmspell-memory::consolidation::daemon::ConsolidationDaemon`; its
//! adaptive-interval scheduling is dropped (this spec's sweep cadence is
//! a single configured interval, not queue-depth-driven) but the
//! graceful-shutdown skeleton is kept verbatim.

use hippocore_core::config::RetentionConfig;
use hippocore_core::error::Result;
use hippocore_core::traits::Embedder;
use hippocore_core::types::{Chunk, Layer, Stage};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::vector_index::HnswVectorIndex;

/// Re-fetches a chunk's original source text at rehydration time (§4.6:
/// "attempt to re-fetch the source file"). An external capability in the
/// same sense `Embedder` is — this crate ships one concrete filesystem
/// implementation.
pub trait SourceReader: Send + Sync {
    fn read_source(&self, source_path: &str) -> Option<String>;
}

/// Reads `source_path` relative to a configured notes root.
pub struct FilesystemSourceReader {
    root: PathBuf,
}

impl FilesystemSourceReader {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SourceReader for FilesystemSourceReader {
    fn read_source(&self, source_path: &str) -> Option<String> {
        let path = self.root.join(source_path);
        std::fs::read_to_string(&path).ok()
    }
}

/// Produces the `<= 50`-token archive summary (§4.6 invariant). An
/// external capability; this crate ships a deterministic stand-in with
/// no model dependency, in the same spirit as
/// [`crate::embedder::ReferenceEmbedder`].
pub trait Summarizer: Send + Sync {
    fn summarize(&self, text: &str, max_tokens: usize) -> String;
}

/// Takes the leading `max_tokens * 4` bytes (the same token heuristic
/// the chunker uses), trimmed to a word boundary, with an ellipsis if
/// truncated.
pub struct TruncatingSummarizer;

impl Summarizer for TruncatingSummarizer {
    fn summarize(&self, text: &str, max_tokens: usize) -> String {
        let budget = max_tokens * 4;
        let trimmed = text.trim();
        if trimmed.len() <= budget {
            return trimmed.to_string();
        }
        let mut end = budget;
        while end > 0 && !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        let slice = &trimmed[..end];
        let cut = slice.rfind(char::is_whitespace).unwrap_or(end);
        format!("{}...", slice[..cut].trim_end())
    }
}

/// Base per-stage TTLs, in days, at the `long_term` layer; other layers
/// scale these down proportionally to their own default TTL relative to
/// `long_term`'s (§9a resolution 1: "layer modulates thresholds").
const DEMOTED_AFTER_DAYS: f64 = 7.0;
const ARCHIVED_AFTER_DAYS: f64 = 30.0;
const REHYDRATABLE_AFTER_DAYS: f64 = 90.0;

fn layer_scale(layer: Layer) -> f64 {
    layer.default_ttl_hours() as f64 / Layer::LongTerm.default_ttl_hours() as f64
}

/// Outcome of one sweep pass, returned for observability and tests.
#[derive(Debug, Clone, Default)]
pub struct SweepStats {
    pub scanned: usize,
    pub demoted: usize,
    pub archived: usize,
    pub rehydratable: usize,
}

pub struct LifecycleManager {
    index: Arc<HnswVectorIndex>,
    embedder: Arc<dyn Embedder>,
    summarizer: Arc<dyn Summarizer>,
    source_reader: Arc<dyn SourceReader>,
    retention: RetentionConfig,
    sweep_interval: Duration,
    running: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl LifecycleManager {
    #[must_use]
    pub fn new(
        index: Arc<HnswVectorIndex>,
        embedder: Arc<dyn Embedder>,
        retention: RetentionConfig,
        sweep_interval: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            index,
            embedder,
            summarizer: Arc::new(TruncatingSummarizer),
            source_reader: Arc::new(FilesystemSourceReader::new(Path::new("."))),
            retention,
            sweep_interval,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            shutdown_rx,
        }
    }

    #[must_use]
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    #[must_use]
    pub fn with_source_reader(mut self, source_reader: Arc<dyn SourceReader>) -> Self {
        self.source_reader = source_reader;
        self
    }

    /// Spawn the periodic sweep in a background task. The `retention`
    /// config's `short_term_hours`/`mid_term_days`/`long_term_days`
    /// table is kept for config round-tripping (§6); per-chunk
    /// thresholds are derived from `Layer::default_ttl_hours` at sweep
    /// time, which carries the same default numbers.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let manager = Arc::clone(&self);
        tokio::spawn(async move { manager.run().await })
    }

    pub fn stop(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        info!("stopping lifecycle manager");
        self.shutdown_tx
            .send(true)
            .map_err(|e| hippocore_core::error::HippoError::SystemError(format!("shutdown signal failed: {e}")))?;
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn run(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut interval = tokio::time::interval(self.sweep_interval.max(Duration::from_millis(1)));
        info!(interval_secs = self.sweep_interval.as_secs(), "lifecycle sweep loop started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.sweep_once().await {
                        Ok(stats) => debug!(?stats, "lifecycle sweep completed"),
                        Err(e) => warn!(error = %e, "lifecycle sweep failed"),
                    }
                }
                _ = shutdown_rx.changed() => {
                    info!("lifecycle sweep loop received shutdown signal");
                    break;
                }
            }
        }
    }

    /// Walk every chunk in the index and apply eligible stage
    /// transitions (§4.6 state machine). Runs synchronously; the
    /// background loop calls it once per interval, but it's also the
    /// unit for tests and for any caller that wants to force a sweep.
    pub async fn sweep_once(&self) -> Result<SweepStats> {
        let now = Utc::now();
        let mut stats = SweepStats::default();
        let mut to_upsert = Vec::new();

        for mut chunk in self.index.all_chunks() {
            stats.scanned += 1;
            let idle_days = (now - chunk.metadata.last_accessed).num_seconds() as f64 / 86_400.0;
            let scale = layer_scale(chunk.metadata.layer);

            let transitioned = match chunk.metadata.stage {
                Stage::Active if idle_days >= DEMOTED_AFTER_DAYS * scale => {
                    chunk.metadata.stage = Stage::Demoted;
                    stats.demoted += 1;
                    true
                }
                Stage::Demoted if idle_days >= ARCHIVED_AFTER_DAYS * scale => {
                    self.archive_chunk(&mut chunk).await?;
                    stats.archived += 1;
                    true
                }
                Stage::Archived if idle_days >= REHYDRATABLE_AFTER_DAYS * scale => {
                    chunk.metadata.stage = Stage::Rehydratable;
                    stats.rehydratable += 1;
                    true
                }
                _ => false,
            };

            if transitioned {
                to_upsert.push(chunk);
            }
        }

        if !to_upsert.is_empty() {
            self.index.upsert(to_upsert).await?;
        }
        Ok(stats)
    }

    /// `demoted -> archived`: summarize, re-embed from the summary
    /// (never the original text, §4.6 invariant), and replace the stored
    /// text with the summary.
    async fn archive_chunk(&self, chunk: &mut Chunk) -> Result<()> {
        let summary = self.summarizer.summarize(&chunk.text, 50);
        let embedding = self.embedder.encode_single(&summary).await?;
        chunk.embedding = Some(embedding);
        chunk.text = summary.clone();
        chunk.metadata.summary = Some(summary);
        chunk.metadata.summary_generated_at = Some(Utc::now());
        chunk.metadata.stage = Stage::Archived;
        Ok(())
    }

    /// Record a retrieval hit against `chunk_id`: bumps access counters
    /// and, for a non-`active` chunk, attempts the single permitted
    /// backward transition (§4.6, §8 "only on access"). Returns whether
    /// the chunk was promoted to `active`.
    pub async fn record_access(&self, chunk_id: Uuid) -> Result<bool> {
        let Some(mut chunk) = self.index.get(chunk_id).await? else {
            return Ok(false);
        };

        chunk.metadata.access_count += 1;
        chunk.metadata.last_accessed = Utc::now();

        let promoted = match chunk.metadata.stage {
            Stage::Active => false,
            Stage::Demoted => {
                chunk.metadata.stage = Stage::Active;
                true
            }
            Stage::Archived | Stage::Rehydratable => {
                if let Some(source_text) = self.source_reader.read_source(&chunk.metadata.source_path) {
                    chunk.embedding = Some(self.embedder.encode_single(&source_text).await?);
                    chunk.text = source_text;
                    chunk.metadata.stage = Stage::Active;
                    chunk.metadata.summary = None;
                    chunk.metadata.summary_generated_at = None;
                    true
                } else {
                    debug!(%chunk_id, "source unavailable, serving summary without promotion");
                    false
                }
            }
        };

        self.index.upsert(vec![chunk]).await?;
        Ok(promoted)
    }
}
