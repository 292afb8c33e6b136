// Line-delimited JSON-RPC 2.0 framing over a child's stdio.
//
// This layer only frames: it knows how to write a request/notification as one
// line of JSON and how to classify an inbound line as a response or a
// notification. Correlating a response with the request that produced it is
// the session's job (see `session.rs`).

use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

pub const JSONRPC_VERSION: &str = "2.0";

/// An outbound JSON-RPC request (has an id, expects a response).
#[derive(Debug, Clone, Serialize)]
pub struct OutboundRequest {
    pub jsonrpc: &'static str,
    pub id: i64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// An outbound JSON-RPC notification (no id, fire-and-forget).
#[derive(Debug, Clone, Serialize)]
pub struct OutboundNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A classified inbound line.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    Response(InboundResponse),
    Notification(InboundNotification),
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundResponse {
    pub id: i64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<InboundError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundNotification {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// Monotone per-session id allocator, starting at 1.
#[derive(Debug, Default)]
pub struct IdAllocator(AtomicI64);

impl IdAllocator {
    pub fn new() -> Self {
        Self(AtomicI64::new(0))
    }

    pub fn next(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Errors a framing-layer write can produce. EOF/write failures are
/// session-terminating per spec; callers turn this into `TransportClosed`.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("write failed: {0}")]
    Write(#[from] std::io::Error),
    #[error("child stdout closed (EOF)")]
    Eof,
}

/// Writes outbound messages as single JSON lines.
pub struct FramedWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FramedWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write_request(&mut self, req: &OutboundRequest) -> Result<(), FramingError> {
        self.write_line(req).await
    }

    pub async fn write_notification(
        &mut self,
        note: &OutboundNotification,
    ) -> Result<(), FramingError> {
        self.write_line(note).await
    }

    async fn write_line<T: Serialize>(&mut self, value: &T) -> Result<(), FramingError> {
        let mut line = serde_json::to_vec(value).map_err(|e| {
            FramingError::Write(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        line.push(b'\n');
        self.inner.write_all(&line).await?;
        self.inner.flush().await?;
        Ok(())
    }
}

/// Reads inbound lines, parses them as JSON, and classifies them.
///
/// Unparseable lines are logged and discarded — they do not terminate the
/// session. EOF is reported as `FramingError::Eof`.
pub struct FramedReader<R> {
    inner: BufReader<R>,
    line_buf: String,
}

impl<R: tokio::io::AsyncRead + Unpin> FramedReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            line_buf: String::new(),
        }
    }

    /// Read and classify the next line. Returns `Ok(None)` for a blank line
    /// (never forwarded to the session), loops internally past garbage.
    pub async fn read_message(&mut self) -> Result<InboundMessage, FramingError> {
        loop {
            self.line_buf.clear();
            let n = self.inner.read_line(&mut self.line_buf).await?;
            if n == 0 {
                return Err(FramingError::Eof);
            }
            let trimmed = self.line_buf.trim();
            if trimmed.is_empty() {
                continue;
            }

            let value: Value = match serde_json::from_str(trimmed) {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, line = %trimmed, "discarding unparseable line from child");
                    continue;
                }
            };

            if value.get("id").is_some()
                && (value.get("result").is_some() || value.get("error").is_some())
            {
                match serde_json::from_value::<InboundResponse>(value) {
                    Ok(resp) => return Ok(InboundMessage::Response(resp)),
                    Err(e) => {
                        warn!(error = %e, "discarding malformed response line");
                        continue;
                    }
                }
            } else if value.get("method").is_some() {
                match serde_json::from_value::<InboundNotification>(value) {
                    Ok(note) => return Ok(InboundMessage::Notification(note)),
                    Err(e) => {
                        warn!(error = %e, "discarding malformed notification line");
                        continue;
                    }
                }
            } else {
                debug!(line = %trimmed, "discarding line that is neither response nor notification");
                continue;
            }
        }
    }
}
