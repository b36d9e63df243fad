//! Wire envelope types for the tool dispatcher (§4.8, §6).
//!
//! Two methods are recognized at the envelope level: `tools/list`
//! (returns the static catalogue below) and `tools/call` (dispatches to
//! one of the six named operations via [`crate::dispatcher::ToolDispatcher`]).
//! A response always carries an `isError` flag rather than relying on
//! the transport to distinguish success from failure (§6: "the stream
//! is never closed on a single-operation failure").

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: String,
}

impl ContentBlock {
    fn text(text: impl Into<String>) -> Self {
        Self {
            block_type: "text".to_string(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub content: Vec<ContentBlock>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl Response {
    #[must_use]
    pub fn ok<T: Serialize>(id: Option<Value>, value: &T) -> Self {
        let text = serde_json::to_string(value)
            .unwrap_or_else(|e| format!("{{\"serialization_error\":\"{e}\"}}"));
        Self {
            id,
            content: vec![ContentBlock::text(text)],
            is_error: false,
        }
    }

    #[must_use]
    pub fn error(id: Option<Value>, message: impl Into<String>) -> Self {
        Self {
            id,
            content: vec![ContentBlock::text(message.into())],
            is_error: true,
        }
    }
}

/// Static description of one dispatcher operation, for `tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub arguments: &'static str,
}

/// The six named operations exposed by the dispatcher (§4.8, §6). Order
/// matches the spec's own tool table.
#[must_use]
pub fn tool_catalogue() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "vector_search",
            description: "Pure vector retrieval with mode adaptation",
            arguments: "{ query, limit?, mode?, filter? }",
        },
        ToolDescriptor {
            name: "memory_store",
            description: "Chunk, embed, and index a new piece of text",
            arguments: "{ text, metadata? }",
        },
        ToolDescriptor {
            name: "graph_query",
            description: "Multi-hop neighborhood via BFS",
            arguments: "{ entities, max_hops?, edge_types? }",
        },
        ToolDescriptor {
            name: "entity_extraction",
            description: "Run the entity extractor",
            arguments: "{ text }",
        },
        ToolDescriptor {
            name: "hipporag_retrieve",
            description: "Full pipeline: entity extraction -> PPR -> chunk ranking",
            arguments: "{ query, limit?, mode? }",
        },
        ToolDescriptor {
            name: "detect_mode",
            description: "Return (mode_name, confidence)",
            arguments: "{ query }",
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_names_the_six_tools_in_spec_order() {
        let names: Vec<&str> = tool_catalogue().iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec![
                "vector_search",
                "memory_store",
                "graph_query",
                "entity_extraction",
                "hipporag_retrieve",
                "detect_mode",
            ]
        );
    }

    #[test]
    fn ok_response_is_not_an_error() {
        let response = Response::ok(None, &serde_json::json!({"a": 1}));
        assert!(!response.is_error);
    }

    #[test]
    fn error_response_carries_the_message_as_text() {
        let response = Response::error(None, "bad input");
        assert!(response.is_error);
        assert_eq!(response.content[0].text, "bad input");
    }
}
