//! Routes a decoded [`crate::protocol::Request`] to one of the six
//! named [`crate::engine::EngineHandle`] operations and shapes the
//! result as a [`crate::protocol::Response`] (§4.8, §6).
//!
//! This is deliberately the *only* place that knows the mapping from
//! external tool names to `EngineHandle` methods — `codec` and
//! `protocol` know nothing about what a `vector_search` is, and
//! `engine` knows nothing about JSON envelopes.

use crate::engine::{
    DetectModeArgs, EngineHandle, EntityExtractionArgs, GraphQueryArgs, HipporagRetrieveArgs,
    MemoryStoreArgs, VectorSearchArgs,
};
use crate::protocol::{Request, Response, ToolCallParams};
use serde_json::Value;

pub struct ToolDispatcher {
    engine: EngineHandle,
}

impl ToolDispatcher {
    #[must_use]
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }

    #[must_use]
    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    /// Dispatch one request. Never returns `Err` — every failure, from
    /// a malformed `tools/call` shape to an `EngineHandle` error, is
    /// folded into an `isError: true` envelope so the stream stays open
    /// (§4.8, §7 "the stream is not closed on error").
    pub async fn dispatch(&self, request: Request) -> Response {
        let id = request.id.clone();
        match request.method.as_str() {
            "tools/list" => {
                let catalogue = crate::protocol::tool_catalogue();
                Response::ok(id, &catalogue)
            }
            "tools/call" => match serde_json::from_value::<ToolCallParams>(request.params) {
                Ok(call) => self.dispatch_tool(id, call).await,
                Err(e) => Response::error(id, format!("malformed tools/call params: {e}")),
            },
            other => Response::error(id, format!("unknown method: {other}")),
        }
    }

    async fn dispatch_tool(&self, id: Option<Value>, call: ToolCallParams) -> Response {
        macro_rules! call_op {
            ($args_ty:ty, $method:ident) => {{
                match serde_json::from_value::<$args_ty>(call.arguments) {
                    Ok(args) => match self.engine.$method(args).await {
                        Ok(result) => Response::ok(id, &result),
                        Err(e) => Response::error(id, e.to_string()),
                    },
                    Err(e) => Response::error(id, format!("malformed arguments for {}: {e}", call.name)),
                }
            }};
        }
        macro_rules! call_op_sync {
            ($args_ty:ty, $method:ident) => {{
                match serde_json::from_value::<$args_ty>(call.arguments) {
                    Ok(args) => match self.engine.$method(args) {
                        Ok(result) => Response::ok(id, &result),
                        Err(e) => Response::error(id, e.to_string()),
                    },
                    Err(e) => Response::error(id, format!("malformed arguments for {}: {e}", call.name)),
                }
            }};
        }

        match call.name.as_str() {
            "vector_search" => call_op!(VectorSearchArgs, vector_search),
            "memory_store" => call_op!(MemoryStoreArgs, memory_store),
            "graph_query" => call_op!(GraphQueryArgs, graph_query),
            "entity_extraction" => call_op_sync!(EntityExtractionArgs, entity_extraction),
            "hipporag_retrieve" => call_op!(HipporagRetrieveArgs, hipporag_retrieve),
            "detect_mode" => call_op_sync!(DetectModeArgs, detect_mode),
            other => Response::error(id, format!("unknown tool: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hippocore_core::config::EngineConfig;
    use tempfile::tempdir;

    async fn test_dispatcher() -> (ToolDispatcher, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = EngineConfig::for_testing(dir.path().to_path_buf());
        let engine = EngineHandle::open(config).await.unwrap();
        (ToolDispatcher::new(engine), dir)
    }

    #[tokio::test]
    async fn tools_list_returns_the_six_tool_catalogue() {
        let (dispatcher, _dir) = test_dispatcher().await;
        let request = Request { id: Some(serde_json::json!(1)), method: "tools/list".to_string(), params: Value::Null };
        let response = dispatcher.dispatch(request).await;
        assert!(!response.is_error);
        let text = &response.content[0].text;
        assert!(text.contains("hipporag_retrieve"));
    }

    #[tokio::test]
    async fn unknown_method_is_an_error_envelope_not_a_closed_stream() {
        let (dispatcher, _dir) = test_dispatcher().await;
        let request = Request { id: None, method: "nonsense".to_string(), params: Value::Null };
        let response = dispatcher.dispatch(request).await;
        assert!(response.is_error);
    }

    #[tokio::test]
    async fn unknown_tool_name_is_an_error_envelope() {
        let (dispatcher, _dir) = test_dispatcher().await;
        let request = Request {
            id: None,
            method: "tools/call".to_string(),
            params: serde_json::json!({"name": "not_a_tool", "arguments": {}}),
        };
        let response = dispatcher.dispatch(request).await;
        assert!(response.is_error);
    }

    #[tokio::test]
    async fn detect_mode_round_trips_through_the_dispatcher() {
        let (dispatcher, _dir) = test_dispatcher().await;
        let request = Request {
            id: Some(serde_json::json!("q1")),
            method: "tools/call".to_string(),
            params: serde_json::json!({"name": "detect_mode", "arguments": {"query": "fix the build"}}),
        };
        let response = dispatcher.dispatch(request).await;
        assert!(!response.is_error);
        assert!(response.content[0].text.contains("execution"));
    }

    #[tokio::test]
    async fn malformed_tool_arguments_are_an_error_envelope() {
        let (dispatcher, _dir) = test_dispatcher().await;
        let request = Request {
            id: None,
            method: "tools/call".to_string(),
            params: serde_json::json!({"name": "memory_store", "arguments": {"nope": true}}),
        };
        let response = dispatcher.dispatch(request).await;
        assert!(response.is_error);
    }
}
