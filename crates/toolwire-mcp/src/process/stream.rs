//! Cancellable line readers for provider stdout/stderr.
//!
//! Providers (often node or python wrappers) can emit non-UTF8 bytes.
//! Lines are read as bytes and decoded lossily so a bad byte never ends
//! the reader.

use std::fmt;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Which pipe a reader is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// Longest stdout/stderr line accepted, terminator included.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Bytes of a dropped line kept for diagnostics.
const EXCERPT_BYTES: usize = 200;

/// Receives the lines of a stream.
pub trait LineHandler: Send + Sync {
    /// One complete line with the terminator stripped. Never empty.
    fn on_line(&self, line: &str);

    /// A line that was dropped unread: oversized, or cut off by end of stream.
    fn on_discarded(&self, excerpt: &str, reason: &str);

    /// End of stream or read error. Not called when the reader was cancelled.
    fn on_closed(&self, reason: &str);
}

/// Spawn a reader task for `stream`.
///
/// With no handler, lines are routed to diagnostics only. The task exits on
/// cancellation, end of stream or a read error.
pub fn spawn_stream_reader(
    stream: impl AsyncRead + Unpin + Send + 'static,
    server: Arc<str>,
    kind: StreamKind,
    cancel: CancellationToken,
    handler: Option<Arc<dyn LineHandler>>,
) -> JoinHandle<()> {
    spawn_limited_reader(stream, server, kind, cancel, handler, MAX_LINE_BYTES)
}

fn spawn_limited_reader(
    stream: impl AsyncRead + Unpin + Send + 'static,
    server: Arc<str>,
    kind: StreamKind,
    cancel: CancellationToken,
    handler: Option<Arc<dyn LineHandler>>,
    max_line_bytes: usize,
) -> JoinHandle<()> {
    let limit = u64::try_from(max_line_bytes).unwrap_or(u64::MAX);

    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf: Vec<u8> = Vec::with_capacity(1024);
        // Inside an oversized line, skipping to its newline
        let mut skipping = false;

        let discard = |buf: &[u8], reason: &str| {
            let excerpt = String::from_utf8_lossy(&buf[..buf.len().min(EXCERPT_BYTES)]);
            match &handler {
                Some(handler) => handler.on_discarded(&excerpt, reason),
                None => warn!(server = %server, stream = %kind, reason = %reason, "Dropping line: {excerpt}"),
            }
        };

        let closed_reason = loop {
            buf.clear();
            let mut limited = (&mut reader).take(limit);
            let read = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(server = %server, stream = %kind, "Stream reader cancelled");
                    return;
                }
                read = limited.read_until(b'\n', &mut buf) => read,
            };

            match read {
                Ok(0) => break "end of stream".to_string(),
                Ok(_) if buf.last() != Some(&b'\n') => {
                    if buf.len() >= max_line_bytes {
                        if !skipping {
                            discard(&buf, &format!("line exceeds {max_line_bytes} bytes"));
                        }
                        skipping = true;
                    } else if !skipping {
                        discard(&buf, "unterminated line at end of stream");
                    }
                }
                Ok(_) if skipping => skipping = false,
                Ok(_) => {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }

                    let line = String::from_utf8_lossy(&buf);
                    if line.trim().is_empty() {
                        continue;
                    }

                    match &handler {
                        Some(handler) => handler.on_line(&line),
                        None => warn!(server = %server, stream = %kind, "{line}"),
                    }
                }
                Err(e) => break format!("read error: {e}"),
            }
        };

        debug!(server = %server, stream = %kind, reason = %closed_reason, "Stream reader exiting");
        if let Some(handler) = &handler {
            if !cancel.is_cancelled() {
                handler.on_closed(&closed_reason);
            }
        }
    })
}
