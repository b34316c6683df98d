//! HTTP/SSE daemon.
//!
//! REST endpoints mutate the timer through its handle; `/api/timer/stream`
//! pushes every broadcast event to a dynamic set of subscribers.
//!
//! ```text
//! GET  /api/timer            current state (no-cache)
//! POST /api/timer            merge a TimerUpdate
//! POST /api/timer/nextmode   switch_next
//! POST /api/timer/prevmode   switch_prev
//! POST /api/timer/pause      toggle, or {"paused": bool}
//! POST /api/timer/reset      reset
//! GET  /api/timer/stream     text/event-stream
//! ```
//!
//! On cancellation every subscriber receives a `restart` event, the
//! streams are closed and the server drains in-flight requests.

mod clients;
mod routes;

pub use clients::{
    ClientGuard, ClientId, ClientRegistry, SseBroadcaster, StreamMessage, CLIENT_BUFFER,
};
pub use routes::{router, ApiError, AppState};

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::engine::TimerHandle;
use crate::server::{bind_listener, ServerError};

/// Default listen address
pub const DEFAULT_HTTP_ADDRESS: &str = "localhost:7900";

/// HTTP server for the JSON API and the event stream.
pub struct HttpDaemon {
    listener: TcpListener,
    state: AppState,
    cancel_token: CancellationToken,
}

impl HttpDaemon {
    pub async fn bind(
        address: &str,
        timer: TimerHandle,
        clients: ClientRegistry,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = bind_listener(address).await?;
        Ok(Self::from_listener(listener, timer, clients, cancel_token))
    }

    pub fn from_listener(
        listener: TcpListener,
        timer: TimerHandle,
        clients: ClientRegistry,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            listener,
            state: AppState { timer, clients },
            cancel_token,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::LocalAddr(e.to_string()))
    }

    /// Serves until cancelled, then announces the restart and shuts down
    /// gracefully.
    pub async fn run(self) -> Result<(), ServerError> {
        info!(address = ?self.listener.local_addr().ok(), "HTTP daemon listening");

        let clients = self.state.clients.clone();
        let cancel = self.cancel_token.clone();
        let shutdown = async move {
            cancel.cancelled().await;
            let notified = clients.broadcast(StreamMessage::restart()).await;
            info!(subscribers = notified, "HTTP daemon shutting down");
            clients.close_all().await;
        };

        axum::serve(self.listener, router(self.state))
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Serve(e.to_string()))?;

        info!("HTTP daemon stopped");
        Ok(())
    }
}
