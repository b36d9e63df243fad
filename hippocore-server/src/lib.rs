//! `ToolDispatcher` (C8): the thin boundary layer that exposes the
//! retrieval engine to external callers over a line-delimited JSON
//! byte-stream protocol (§4.8, §6).
//!
//! This crate owns nothing the core doesn't already own — it wires
//! `hippocore-core`/`-memory`/`-graph`/`-context`/`-trace` together
//! behind [`engine::EngineHandle`], frames requests/responses with
//! [`codec`], and routes `tools/call` invocations with [`dispatcher`].
//! The JSON-RPC transport itself (what carries the byte stream) is out
//! of scope per §1; this crate treats it as `AsyncRead + AsyncWrite`.

pub mod codec;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod protocol;

pub use dispatcher::ToolDispatcher;
pub use engine::EngineHandle;
pub use error::{Result, ServerError};

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

/// Drive one connection to completion: decode a request, dispatch it,
/// encode the response, repeat until clean EOF. A decode failure (a
/// malformed line) does not end the loop — it is reported back as an
/// error envelope with a `null` id, per §4.8's "never closed on a
/// single-operation failure".
pub async fn serve<R, W>(dispatcher: &ToolDispatcher, reader: R, writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut decoder = codec::LineDecoder::new(reader);
    let mut encoder = codec::LineEncoder::new(writer);

    loop {
        let response = match decoder.decode().await {
            Ok(Some(request)) => {
                debug!(method = %request.method, "dispatching request");
                dispatcher.dispatch(request).await
            }
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!(error = %e, "malformed request line");
                protocol::Response::error(None, e.to_string())
            }
        };
        encoder.encode(&response).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hippocore_core::config::EngineConfig;
    use tempfile::tempdir;

    #[tokio::test]
    async fn serve_answers_a_tools_list_request_and_then_stops_at_eof() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::for_testing(dir.path().to_path_buf());
        let engine = EngineHandle::open(config).await.unwrap();
        let dispatcher = ToolDispatcher::new(engine);

        let input = b"{\"method\":\"tools/list\",\"params\":null}\n".to_vec();
        let mut output = Vec::new();
        serve(&dispatcher, input.as_slice(), &mut output).await.unwrap();

        let line = String::from_utf8(output).unwrap();
        assert!(line.contains("\"isError\":false"));
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[tokio::test]
    async fn serve_reports_malformed_lines_as_error_envelopes_and_keeps_going() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::for_testing(dir.path().to_path_buf());
        let engine = EngineHandle::open(config).await.unwrap();
        let dispatcher = ToolDispatcher::new(engine);

        let input = b"not json\n{\"method\":\"tools/list\",\"params\":null}\n".to_vec();
        let mut output = Vec::new();
        serve(&dispatcher, input.as_slice(), &mut output).await.unwrap();

        let text = String::from_utf8(output).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"isError\":true"));
        assert!(lines[1].contains("\"isError\":false"));
    }
}
