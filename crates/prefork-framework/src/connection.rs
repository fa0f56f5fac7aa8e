//! # Accepted Connection
//!
//! A connection is owned by exactly one worker for the length of one handle cycle and is
//! closed when the cycle ends, whatever the handler's outcome.

use crate::error::CleanupError;
use crate::silently::{Completion, Operable, Operation};
use std::io;
use std::net::{Shutdown, SocketAddr};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

/// A client connection accepted from the shared listener.
#[derive(Debug)]
pub struct Connection {
    stream: Option<TcpStream>,
    peer: SocketAddr,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream: Some(stream),
            peer,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Performs a single read into `buf`. Zero means the peer sent nothing.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stream.as_mut() {
            Some(stream) => stream.read(buf).await,
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection is closed",
            )),
        }
    }

    fn close(&mut self) -> Result<(), CleanupError> {
        let stream = self.stream.take().ok_or(CleanupError::AlreadyClosed)?;
        // The socket is released when `stream` drops, even if shutdown fails.
        let stream = stream.into_std()?;
        stream.shutdown(Shutdown::Both)?;
        Ok(())
    }
}

impl Operable for Connection {
    fn target(&self) -> &'static str {
        "connection"
    }

    fn supports(&self, operation: &Operation) -> bool {
        matches!(operation, Operation::Close)
    }

    fn perform(&mut self, _: Operation) -> Result<Completion, CleanupError> {
        self.close().map(|()| Completion::Done)
    }
}
