//! # Connection Handler
//!
//! The handler receives one request per connection. It performs a single bounded read and
//! never writes a response: callers of this server must not expect anything on the wire.

use crate::connection::Connection;
use crate::worker::Ordinal;
use async_trait::async_trait;
use std::io;
use tracing::info;

/// Maximum bytes read from a connection, in one call.
pub const READ_CHUNK: usize = 4096;

/// Bytes of payload shown in logs.
pub const PREVIEW_LEN: usize = 100;

/// Handles the single request carried by an accepted connection.
///
/// Implementations must not close the connection; the worker does that once `handle`
/// returns, on success and on failure alike. Returning an error fails this connection
/// only, the worker carries on with its next accept.
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    async fn handle(&self, connection: &mut Connection, ordinal: Ordinal) -> io::Result<()>;
}

/// Reads at most [`READ_CHUNK`] bytes and logs a truncated view of them.
///
/// Empty and partial reads are valid requests.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

#[async_trait]
impl ConnectionHandler for LoggingHandler {
    async fn handle(&self, connection: &mut Connection, ordinal: Ordinal) -> io::Result<()> {
        let mut buf = [0u8; READ_CHUNK];
        let read = connection.read_chunk(&mut buf).await?;
        info!(
            pid = std::process::id(),
            %ordinal,
            peer = %connection.peer(),
            bytes = read,
            payload = %preview(&buf[..read]),
            "Received"
        );
        Ok(())
    }
}

/// View of the first [`PREVIEW_LEN`] bytes of `payload`, followed by `...`.
///
/// Decoded as lossy UTF-8, with control characters escaped so one request stays on one
/// log line.
pub fn preview(payload: &[u8]) -> String {
    let head = &payload[..payload.len().min(PREVIEW_LEN)];
    format!("{}...", String::from_utf8_lossy(head).escape_debug())
}
