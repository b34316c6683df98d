//! TCP control daemon.
//!
//! The daemon:
//! - Listens on a TCP address for control clients
//! - Spawns a ConnectionHandler for each client
//! - Stops accepting as soon as the generation's CancellationToken fires,
//!   then waits for its handlers to finish
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │    TcpDaemon    │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│   TimerHandle   │
//! │   (per client)  │     │                 │
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept errors are logged and the loop keeps going
//! - A failing connection only ends its own handler

mod connection;

pub use connection::{ConnectionError, ConnectionHandler};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::engine::TimerHandle;

/// Default listen address
pub const DEFAULT_TCP_ADDRESS: &str = "localhost:7800";

/// Binds a TCP listener, mapping the failure to [`ServerError::Bind`].
pub async fn bind_listener(address: &str) -> Result<TcpListener, ServerError> {
    TcpListener::bind(address)
        .await
        .map_err(|e| ServerError::Bind {
            address: address.to_string(),
            error: e.to_string(),
        })
}

/// TCP server speaking the line-oriented control protocol.
pub struct TcpDaemon {
    listener: TcpListener,

    /// Handle to the timer actor
    timer: TimerHandle,

    /// Cancellation token of the current generation
    cancel_token: CancellationToken,

    /// Connection counter for log correlation
    connection_counter: AtomicU64,

    /// Per-connection handler tasks
    tracker: TaskTracker,
}

impl TcpDaemon {
    /// Binds the listener. Binding happens before the generation starts so
    /// that a bad address is reported up front.
    pub async fn bind(
        address: &str,
        timer: TimerHandle,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = bind_listener(address).await?;
        Ok(Self::from_listener(listener, timer, cancel_token))
    }

    pub fn from_listener(
        listener: TcpListener,
        timer: TimerHandle,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            listener,
            timer,
            cancel_token,
            connection_counter: AtomicU64::new(0),
            tracker: TaskTracker::new(),
        }
    }

    /// Returns the bound address (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::LocalAddr(e.to_string()))
    }

    /// Runs the accept loop until cancelled, then waits for every
    /// connection handler to return.
    pub async fn run(self) -> Result<(), ServerError> {
        info!(address = ?self.listener.local_addr().ok(), "TCP daemon listening");

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("TCP daemon shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            self.handle_connection(stream, peer, conn_num);
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                            // Continue accepting other connections
                        }
                    }
                }
            }
        }

        // Stop accepting before draining handlers
        drop(self.listener);
        self.tracker.close();
        self.tracker.wait().await;
        debug!(
            connections = self.connection_counter.load(Ordering::Relaxed),
            "TCP daemon stopped"
        );
        Ok(())
    }

    fn handle_connection(&self, stream: TcpStream, peer: SocketAddr, connection_number: u64) {
        let (reader, writer) = stream.into_split();
        let handler = ConnectionHandler::new(
            reader,
            writer,
            self.timer.clone(),
            self.cancel_token.clone(),
            connection_number,
            peer,
        );
        self.tracker.spawn(handler.run());
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {address}: {error}")]
    Bind { address: String, error: String },

    #[error("Failed to read local address: {0}")]
    LocalAddr(String),

    #[error("Server failed: {0}")]
    Serve(String),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_display() {
        let err = ServerError::Bind {
            address: "localhost:7800".to_string(),
            error: "address in use".to_string(),
        };
        assert_eq!(err.to_string(), "Failed to bind localhost:7800: address in use");
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_address() {
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let timer = TimerHandle::new(tx);
        let result = TcpDaemon::bind("not an address", timer, CancellationToken::new()).await;
        assert!(matches!(result, Err(ServerError::Bind { .. })));
    }
}
