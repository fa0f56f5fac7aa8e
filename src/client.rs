//! One-shot test client.

use std::io;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::info;

/// Opens a connection, sends `message`, then closes the write side.
///
/// The server never replies, so nothing is read back.
pub async fn send_greeting(host: &str, port: u16, message: &[u8]) -> io::Result<()> {
    let mut stream = TcpStream::connect((host, port)).await?;
    let peer = stream.peer_addr()?;
    stream.write_all(message).await?;
    stream.shutdown().await?;
    info!(%peer, bytes = message.len(), "Sent");
    Ok(())
}
