//! Hand-rolled newline framing over a byte stream (§6a).
//!
//! Grounded on the shape of the teacher's old protocol codec (a
//! `Decoder`/`Encoder` pair wrapping a byte stream) but adapted from
//! length-delimited frames to line-delimited JSON, as the spec's
//! external interface requires (§4.8: "line-delimited JSON request
//! envelopes"). `tokio_util::codec::LengthDelimitedCodec`, what the
//! teacher used, has no place here — there is no length prefix on the
//! wire.

use crate::error::{Result, ServerError};
use crate::protocol::Request;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};

/// Reads one JSON request per line from `R`. A malformed line is
/// surfaced as an `Err` rather than treated as the end of the stream —
/// the caller is expected to respond with an error envelope and keep
/// reading (§4.8: "the stream is never closed on a single-operation
/// failure"). Only a clean EOF ends the stream.
pub struct LineDecoder<R> {
    lines: Lines<BufReader<R>>,
}

impl<R: AsyncRead + Unpin> LineDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
        }
    }

    /// Returns `Ok(None)` on clean EOF, `Ok(Some(request))` on a
    /// successfully parsed line, `Err` on a malformed line or I/O
    /// failure. Blank lines are skipped rather than rejected.
    pub async fn decode(&mut self) -> Result<Option<Request>> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let request: Request = serde_json::from_str(trimmed)
                .map_err(|e| ServerError::InvalidArguments(format!("malformed request envelope: {e}")))?;
            return Ok(Some(request));
        }
    }
}

/// Writes one JSON response per line to `W`, flushing after every
/// write so a line-buffered reader on the other end sees it promptly.
pub struct LineEncoder<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> LineEncoder<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn encode(&mut self, response: &crate::protocol::Response) -> Result<()> {
        let mut line = serde_json::to_string(response).map_err(|e| ServerError::Core(e.into()))?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
