//! Public response types for C5 RetrievalCore (§4.5).

use hippocore_core::types::Chunk;
use uuid::Uuid;

/// The result of one `retrieve()` call.
#[derive(Debug, Clone)]
pub struct RetrievalResponse {
    pub core: Vec<Chunk>,
    pub extended: Vec<Chunk>,
    pub mode: String,
    pub mode_confidence: f32,
    pub trace_id: Uuid,
    pub routing: String,
}
