//! Satellite mode: follow a remote daemon.
//!
//! ```text
//!   local mutation ──set──▶ RemoteForwarder ──POST /api/timer──▶ remote
//!                                                                   │
//!   local hooks ◀──Mirror── RemoteSubscription ◀──/api/timer/stream─┘
//! ```
//!
//! The local engine does not tick; the remote daemon is the authority on
//! time and echoes every change back through its event stream. The
//! subscription reconnects after errors and after a `restart` event.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pomo_core::{EventKind, TimerEvent, TimerSnapshot};
use pomo_protocol::{
    SseDecodeError, SseDecoder, SseFrame, TimerUpdate, BROADCAST_EVENTS, EVENT_TIMER,
};

use crate::engine::{TimerError, TimerHandle};
use crate::hooks::HookHandler;

/// Pause between reconnect attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Timeout for a single forwarded update.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Turns a configured address into a base URL.
///
/// `:7900` means localhost; a missing scheme means plain http.
pub fn normalize_address(address: &str) -> String {
    let address = address.trim().trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else if address.starts_with(':') {
        format!("http://localhost{address}")
    } else {
        format!("http://{address}")
    }
}

/// Maps a stream frame to the hook it should fire locally.
///
/// The initial `timer` snapshot counts as a `change`.
pub fn mirror_kind(frame: &SseFrame) -> Option<EventKind> {
    if frame.event == EVENT_TIMER {
        return Some(EventKind::Change);
    }
    frame.kind().filter(|kind| BROADCAST_EVENTS.contains(kind))
}

/// HTTP client bound to one remote daemon.
#[derive(Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    base: String,
}

impl RemoteClient {
    pub fn new(address: &str) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base: normalize_address(address),
        })
    }

    pub fn timer_url(&self) -> String {
        format!("{}/api/timer", self.base)
    }

    pub fn stream_url(&self) -> String {
        format!("{}/api/timer/stream", self.base)
    }

    /// Sends a local state to the remote and returns its resulting state.
    pub async fn push(&self, update: &TimerUpdate) -> Result<TimerSnapshot, RemoteError> {
        let response = self
            .http
            .post(self.timer_url())
            .timeout(REQUEST_TIMEOUT)
            .json(update)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

/// `set` subscriber forwarding every local mutation upstream.
pub struct RemoteForwarder {
    client: RemoteClient,
}

impl RemoteForwarder {
    pub fn new(client: RemoteClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HookHandler for RemoteForwarder {
    async fn handle(&self, event: TimerEvent) {
        let update = TimerUpdate::from_state(&event.snapshot().state);
        match self.client.push(&update).await {
            Ok(_) => debug!(url = %self.client.timer_url(), "Forwarded update"),
            Err(e) => warn!(url = %self.client.timer_url(), error = %e, "Failed to forward update"),
        }
    }
}

/// How one stream connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// Remote announced a reload
    Restart,
    /// Remote closed the connection
    Closed,
    /// Local generation cancelled
    Cancelled,
}

/// Long-lived task mirroring the remote event stream into the local engine.
pub struct RemoteSubscription {
    client: RemoteClient,
    timer: TimerHandle,
    cancel: CancellationToken,
    reconnect_delay: Duration,
}

impl RemoteSubscription {
    pub fn new(client: RemoteClient, timer: TimerHandle, cancel: CancellationToken) -> Self {
        Self {
            client,
            timer,
            cancel,
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Follows the remote until the generation is cancelled.
    pub async fn run(self) {
        info!(url = %self.client.stream_url(), "Following remote timer");

        loop {
            match self.stream_once().await {
                Ok(StreamEnd::Cancelled) => break,
                Ok(StreamEnd::Restart) => info!("Remote daemon restarting, reconnecting"),
                Ok(StreamEnd::Closed) => info!("Remote stream closed, reconnecting"),
                Err(RemoteError::Timer(_)) => {
                    debug!("Local timer gone, stopping remote subscription");
                    break;
                }
                Err(e) => warn!(error = %e, "Remote stream failed"),
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        debug!("Remote subscription stopped");
    }

    /// Consumes one stream connection.
    pub async fn stream_once(&self) -> Result<StreamEnd, RemoteError> {
        let request = self
            .client
            .http
            .get(self.client.stream_url())
            .header(ACCEPT, "text/event-stream")
            .send();

        let response = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(StreamEnd::Cancelled),
            response = request => response?.error_for_status()?,
        };

        let mut bytes = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        loop {
            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(StreamEnd::Cancelled),
                chunk = bytes.next() => chunk,
            };
            let Some(chunk) = chunk else {
                return Ok(StreamEnd::Closed);
            };

            for frame in decoder.push(&chunk?)? {
                if frame.is_restart() {
                    return Ok(StreamEnd::Restart);
                }
                self.mirror(&frame).await?;
            }
        }
    }

    async fn mirror(&self, frame: &SseFrame) -> Result<(), RemoteError> {
        let Some(kind) = mirror_kind(frame) else {
            debug!(event = %frame.event, "Ignoring stream event");
            return Ok(());
        };
        let snapshot = frame
            .snapshot()
            .map_err(|e| RemoteError::Payload(e.to_string()))?;
        self.timer.mirror(kind, snapshot.state).await?;
        Ok(())
    }
}

/// Errors talking to a remote daemon.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Event stream error: {0}")]
    Decode(#[from] SseDecodeError),

    #[error("Invalid event payload: {0}")]
    Payload(String),

    #[error("Local timer error: {0}")]
    Timer(#[from] TimerError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(event: &str) -> SseFrame {
        SseFrame {
            event: event.to_string(),
            data: "{}".to_string(),
        }
    }

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address(":7900"), "http://localhost:7900");
        assert_eq!(normalize_address("example.com:7900"), "http://example.com:7900");
        assert_eq!(normalize_address("https://example.com/"), "https://example.com");
        assert_eq!(normalize_address("http://127.0.0.1:1"), "http://127.0.0.1:1");
    }

    #[test]
    fn test_urls() {
        let client = RemoteClient::new("localhost:7900").unwrap();
        assert_eq!(client.timer_url(), "http://localhost:7900/api/timer");
        assert_eq!(client.stream_url(), "http://localhost:7900/api/timer/stream");
    }

    #[test]
    fn test_mirror_kind() {
        assert_eq!(mirror_kind(&frame("timer")), Some(EventKind::Change));
        assert_eq!(mirror_kind(&frame("change")), Some(EventKind::Change));
        assert_eq!(mirror_kind(&frame("mode-end")), Some(EventKind::ModeEnd));
        assert_eq!(mirror_kind(&frame("pause")), Some(EventKind::Pause));
        assert_eq!(mirror_kind(&frame("set")), None);
        assert_eq!(mirror_kind(&frame("quit")), None);
        assert_eq!(mirror_kind(&frame("message")), None);
    }

    #[tokio::test]
    async fn test_cancelled_subscription_stops() {
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        // nothing listens on port 1; cancellation wins either way
        let client = RemoteClient::new("127.0.0.1:1").unwrap();
        let subscription = RemoteSubscription::new(client, TimerHandle::new(tx), cancel)
            .with_reconnect_delay(Duration::from_millis(1));
        tokio::time::timeout(Duration::from_secs(5), subscription.run())
            .await
            .unwrap();
    }
}
