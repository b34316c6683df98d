//! Connection handler for individual TCP control clients.
//!
//! Each connection gets its own `ConnectionHandler` that:
//! - Sends the greeting line
//! - Reads one command per line
//! - Replies `OK` or `ACK` for each
//! - Stops when the client disconnects or the generation is cancelled
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Connection errors are logged and result in graceful disconnect

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use pomo_protocol::reply;

use crate::control;
use crate::engine::TimerHandle;

/// Maximum line size (64 KiB)
const MAX_LINE_SIZE: usize = 64 * 1024;

/// Read timeout for idle connections (1 hour)
const READ_TIMEOUT: Duration = Duration::from_secs(3600);

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection handler for a single client.
pub struct ConnectionHandler {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    timer: TimerHandle,
    cancel_token: CancellationToken,
    connection_number: u64,
    peer: SocketAddr,
}

impl ConnectionHandler {
    pub fn new(
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        timer: TimerHandle,
        cancel_token: CancellationToken,
        connection_number: u64,
        peer: SocketAddr,
    ) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
            timer,
            cancel_token,
            connection_number,
            peer,
        }
    }

    /// Runs the connection until it closes.
    pub async fn run(mut self) {
        debug!(connection = self.connection_number, peer = %self.peer, "Client connected");

        if let Err(e) = self.send(&reply::greeting()).await {
            debug!(connection = self.connection_number, error = %e, "Failed to greet client");
            return;
        }

        if let Err(e) = self.process_lines().await {
            debug!(
                connection = self.connection_number,
                error = %e,
                "Connection closed"
            );
        }

        debug!(connection = self.connection_number, "Client disconnected");
    }

    /// Request/reply loop.
    async fn process_lines(&mut self) -> Result<(), ConnectionError> {
        let cancel = self.cancel_token.clone();

        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(connection = self.connection_number, "Closing connection on shutdown");
                    return Ok(());
                }

                result = timeout(READ_TIMEOUT, self.read_line()) => match result {
                    Ok(Ok(Some(line))) => line,
                    Ok(Ok(None)) => {
                        debug!(connection = self.connection_number, "Client sent EOF");
                        return Ok(());
                    }
                    Ok(Err(e)) => return Err(e),
                    Err(_) => return Err(ConnectionError::Timeout),
                },
            };

            let command = line.trim();
            let response = control::respond(&self.timer, command).await;
            if response.starts_with("ACK") {
                debug!(
                    connection = self.connection_number,
                    command = %command,
                    reply = %response.trim_end(),
                    "Command rejected"
                );
            }
            self.send(&response).await?;
        }
    }

    /// Reads one line; `None` on EOF.
    async fn read_line(&mut self) -> Result<Option<String>, ConnectionError> {
        read_bounded_line(&mut self.reader, MAX_LINE_SIZE).await
    }

    async fn send(&mut self, text: &str) -> Result<(), ConnectionError> {
        let writer = &mut self.writer;
        match timeout(WRITE_TIMEOUT, async {
            writer.write_all(text.as_bytes()).await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        })
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
            Err(_) => Err(ConnectionError::WriteTimeout),
        }
    }
}

/// Reads up to a newline without ever buffering more than `max` bytes
/// past it. Invalid UTF-8 is replaced rather than rejected so the command
/// parser can answer with an ACK.
async fn read_bounded_line<R>(
    reader: &mut R,
    max: usize,
) -> Result<Option<String>, ConnectionError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let limit = u64::try_from(max).unwrap_or(u64::MAX).saturating_add(1);

    let bytes_read = (&mut *reader)
        .take(limit)
        .read_until(b'\n', &mut buf)
        .await
        .map_err(|e| ConnectionError::Io(e.to_string()))?;

    if bytes_read == 0 {
        return Ok(None);
    }

    if buf.len() > max && buf.last() != Some(&b'\n') {
        return Err(ConnectionError::LineTooLong {
            size: buf.len(),
            max,
        });
    }

    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Read timeout")]
    Timeout,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Line too long: {size} bytes (max: {max})")]
    LineTooLong { size: usize, max: usize },
}
