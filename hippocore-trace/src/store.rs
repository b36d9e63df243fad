//! Append-only trace store (§4.7, §6 `<data_dir>/traces.db`).
//!
//! Grounded on `hippocore_memory::vector_index`'s durable-write shape
//! (append, never mutate past fields except the small set a later phase
//! legitimately updates — here, `output` and the attribution columns
//! once a downstream consumer's response and a post-hoc classification
//! are available) but backed by `libsql` instead of a hand-rolled WAL,
//! since a relational store is what the schema (§3 `QueryTrace`) and
//! the windowed aggregate queries (§4.7 Statistics API) actually want.

use crate::attribution::Attribution;
use crate::error::{Result, TraceError};
use chrono::{DateTime, Utc};
use hippocore_core::types::{ErrorType, QueryTrace};
use libsql::{params, Builder, Connection, Row};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

const CREATE_TABLE_SQL: &str = "
CREATE TABLE IF NOT EXISTS traces (
    query_id TEXT PRIMARY KEY,
    timestamp TEXT NOT NULL,
    query TEXT NOT NULL,
    user_context TEXT,
    mode_detected TEXT NOT NULL,
    mode_confidence REAL NOT NULL,
    stores_queried TEXT NOT NULL,
    routing_logic TEXT NOT NULL,
    retrieved_chunks TEXT NOT NULL,
    phase_latencies_ms TEXT NOT NULL,
    verification_result INTEGER,
    output TEXT,
    total_latency_ms INTEGER NOT NULL,
    error TEXT,
    error_type TEXT,
    attributed_error_type TEXT,
    attributed_sub_category TEXT
)";

const CREATE_TIMESTAMP_INDEX_SQL: &str = "CREATE INDEX IF NOT EXISTS idx_traces_timestamp ON traces(timestamp)";

/// Windowed aggregate over the trace store (§4.7 Statistics API): counts
/// by `error_type` (the attributed classification when present,
/// otherwise whatever the pipeline itself assigned) and the one
/// mechanically-detected context-bug subcategory.
#[derive(Debug, Clone)]
pub struct TraceStats {
    pub window_days: u32,
    pub total_traces: u64,
    pub by_error_type: HashMap<String, u64>,
    pub wrong_lifecycle_count: u64,
}

pub struct TraceStore {
    conn: Connection,
}

impl TraceStore {
    pub async fn open(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await.map_err(|e| TraceError::Core(e.into()))?;
        let db_path = data_dir.join("traces.db");
        let store = Self::from_database(Builder::new_local(&db_path).build().await?).await?;
        debug!(path = %db_path.display(), "opened trace store");
        Ok(store)
    }

    /// In-process store for tests — no `data_dir` required.
    #[cfg(test)]
    async fn open_in_memory() -> Result<Self> {
        Self::from_database(Builder::new_local(":memory:").build().await?).await
    }

    async fn from_database(db: libsql::Database) -> Result<Self> {
        let conn = db.connect()?;
        conn.execute(CREATE_TABLE_SQL, ()).await?;
        conn.execute(CREATE_TIMESTAMP_INDEX_SQL, ()).await?;
        Ok(Self { conn })
    }

    /// Insert a trace, or update it in place if `query_id` already
    /// exists — the one legitimate post-hoc mutation (§4.7: a
    /// downstream consumer's `output` and an attribution pass both
    /// arrive after the trace row is first written).
    pub async fn record(&self, trace: &QueryTrace, attribution: Option<&Attribution>) -> Result<()> {
        let stores_queried = serde_json::to_string(&trace.stores_queried)?;
        let retrieved_chunks = serde_json::to_string(&trace.retrieved_chunks)?;
        let phase_latencies_ms = serde_json::to_string(&trace.phase_latencies_ms)?;
        let error_type = trace.error_type.map(error_type_str);
        let (attributed_error_type, attributed_sub_category) = match attribution {
            Some(a) => (Some(error_type_str(a.error_type)), a.sub_category.clone()),
            None => (None, None),
        };

        self.conn
            .execute(
                "INSERT INTO traces (query_id, timestamp, query, user_context, mode_detected, \
                 mode_confidence, stores_queried, routing_logic, retrieved_chunks, \
                 phase_latencies_ms, verification_result, output, total_latency_ms, error, \
                 error_type, attributed_error_type, attributed_sub_category) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17) \
                 ON CONFLICT(query_id) DO UPDATE SET \
                 output = excluded.output, error = excluded.error, error_type = excluded.error_type, \
                 attributed_error_type = excluded.attributed_error_type, \
                 attributed_sub_category = excluded.attributed_sub_category",
                params![
                    trace.query_id.to_string(),
                    trace.timestamp.to_rfc3339(),
                    trace.query.clone(),
                    trace.user_context.clone(),
                    trace.mode_detected.clone(),
                    f64::from(trace.mode_confidence),
                    stores_queried,
                    trace.routing_logic.clone(),
                    retrieved_chunks,
                    phase_latencies_ms,
                    trace.verification_result.map(i64::from),
                    trace.output.clone(),
                    trace.total_latency_ms as i64,
                    trace.error.clone(),
                    error_type,
                    attributed_error_type,
                    attributed_sub_category,
                ],
            )
            .await?;
        info!(query_id = %trace.query_id, "trace recorded");
        Ok(())
    }

    pub async fn get(&self, query_id: Uuid) -> Result<Option<QueryTrace>> {
        let mut rows = self
            .conn
            .query("SELECT * FROM traces WHERE query_id = ?1", params![query_id.to_string()])
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_trace(&row)?)),
            None => Ok(None),
        }
    }

    /// Deletes traces older than `retention_days` (§6
    /// `trace.retention_days`, default 30). Returns the row count
    /// removed.
    pub async fn sweep_expired(&self, retention_days: u32) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
        let deleted = self
            .conn
            .execute("DELETE FROM traces WHERE timestamp < ?1", params![cutoff.to_rfc3339()])
            .await?;
        debug!(deleted, retention_days, "swept expired traces");
        Ok(deleted)
    }

    /// Aggregate counts over the trailing `window_days` (§4.7
    /// Statistics API: "these queries run against the trace store, not
    /// against live indices").
    pub async fn stats(&self, window_days: u32) -> Result<TraceStats> {
        let since = (Utc::now() - chrono::Duration::days(i64::from(window_days))).to_rfc3339();

        let mut total_rows = self
            .conn
            .query("SELECT COUNT(*) FROM traces WHERE timestamp >= ?1", params![since.clone()])
            .await?;
        let total_traces = match total_rows.next().await? {
            Some(row) => row.get::<i64>(0)?.max(0) as u64,
            None => 0,
        };

        let mut by_error_type = HashMap::new();
        let mut kind_rows = self
            .conn
            .query(
                "SELECT COALESCE(attributed_error_type, error_type) AS kind, COUNT(*) \
                 FROM traces WHERE timestamp >= ?1 AND kind IS NOT NULL GROUP BY kind",
                params![since.clone()],
            )
            .await?;
        while let Some(row) = kind_rows.next().await? {
            let kind: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            by_error_type.insert(kind, count.max(0) as u64);
        }

        let mut wrong_lifecycle_rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM traces WHERE timestamp >= ?1 AND attributed_sub_category = 'wrong_lifecycle'",
                params![since],
            )
            .await?;
        let wrong_lifecycle_count = match wrong_lifecycle_rows.next().await? {
            Some(row) => row.get::<i64>(0)?.max(0) as u64,
            None => 0,
        };

        Ok(TraceStats {
            window_days,
            total_traces,
            by_error_type,
            wrong_lifecycle_count,
        })
    }
}

fn error_type_str(t: ErrorType) -> &'static str {
    match t {
        ErrorType::ContextBug => "context_bug",
        ErrorType::ModelBug => "model_bug",
        ErrorType::SystemError => "system_error",
    }
}

fn parse_error_type(s: &str) -> Option<ErrorType> {
    match s {
        "context_bug" => Some(ErrorType::ContextBug),
        "model_bug" => Some(ErrorType::ModelBug),
        "system_error" => Some(ErrorType::SystemError),
        _ => None,
    }
}

fn row_to_trace(row: &Row) -> Result<QueryTrace> {
    let query_id: String = row.get(0)?;
    let timestamp: String = row.get(1)?;
    let query: String = row.get(2)?;
    let user_context: Option<String> = row.get(3)?;
    let mode_detected: String = row.get(4)?;
    let mode_confidence: f64 = row.get(5)?;
    let stores_queried: String = row.get(6)?;
    let routing_logic: String = row.get(7)?;
    let retrieved_chunks: String = row.get(8)?;
    let phase_latencies_ms: String = row.get(9)?;
    let verification_result: Option<i64> = row.get(10)?;
    let output: Option<String> = row.get(11)?;
    let total_latency_ms: i64 = row.get(12)?;
    let error: Option<String> = row.get(13)?;
    let error_type: Option<String> = row.get(14)?;

    Ok(QueryTrace {
        query_id: Uuid::parse_str(&query_id).map_err(|e| TraceError::Core(hippocore_core::HippoError::SystemError(e.to_string())))?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| TraceError::Core(hippocore_core::HippoError::SystemError(e.to_string())))?,
        query,
        user_context,
        mode_detected,
        mode_confidence: mode_confidence as f32,
        stores_queried: serde_json::from_str(&stores_queried)?,
        routing_logic,
        retrieved_chunks: serde_json::from_str(&retrieved_chunks)?,
        phase_latencies_ms: serde_json::from_str(&phase_latencies_ms)?,
        verification_result: verification_result.map(|v| v != 0),
        output,
        total_latency_ms: total_latency_ms as u64,
        error,
        error_type: error_type.as_deref().and_then(parse_error_type),
    })
}
