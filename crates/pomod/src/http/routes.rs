//! HTTP route handlers.

use std::convert::Infallible;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::{self, Stream, StreamExt};
use serde_json::json;
use tracing::debug;

use pomo_core::TimerSnapshot;
use pomo_protocol::{PauseRequest, TimerUpdate, BROADCAST_EVENTS, EVENT_TIMER};

use super::clients::{ClientGuard, ClientRegistry, StreamMessage};
use crate::engine::{TimerError, TimerHandle, TimerOp};

/// Shared state of every route.
#[derive(Clone)]
pub struct AppState {
    pub timer: TimerHandle,
    pub clients: ClientRegistry,
}

/// Builds the `/api` router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/timer", get(get_timer).post(post_timer))
        .route("/api/timer/nextmode", post(next_mode))
        .route("/api/timer/prevmode", post(prev_mode))
        .route("/api/timer/pause", post(pause))
        .route("/api/timer/reset", post(reset))
        .route("/api/timer/stream", get(stream_timer))
        .with_state(state)
}

// ============================================================================
// Errors
// ============================================================================

/// Errors returned by the HTTP API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("timer unavailable: {0}")]
    Unavailable(#[from] TimerError),

    #[error("invalid request body: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// A snapshot response that is never cached.
struct TimerResponse(TimerSnapshot);

impl IntoResponse for TimerResponse {
    fn into_response(self) -> Response {
        ([(header::CACHE_CONTROL, "no-cache")], Json(self.0)).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn get_timer(State(state): State<AppState>) -> Result<TimerResponse, ApiError> {
    Ok(TimerResponse(state.timer.snapshot().await?))
}

async fn post_timer(
    State(state): State<AppState>,
    Json(update): Json<TimerUpdate>,
) -> Result<TimerResponse, ApiError> {
    debug!(?update, "POST /api/timer");
    Ok(TimerResponse(state.timer.update(update).await?))
}

async fn next_mode(State(state): State<AppState>) -> Result<TimerResponse, ApiError> {
    Ok(TimerResponse(state.timer.apply(TimerOp::Next).await?))
}

async fn prev_mode(State(state): State<AppState>) -> Result<TimerResponse, ApiError> {
    Ok(TimerResponse(state.timer.apply(TimerOp::Prev).await?))
}

async fn reset(State(state): State<AppState>) -> Result<TimerResponse, ApiError> {
    Ok(TimerResponse(state.timer.apply(TimerOp::Reset).await?))
}

/// Toggles, or sets explicitly with a `{"paused": bool}` body.
async fn pause(State(state): State<AppState>, body: Bytes) -> Result<TimerResponse, ApiError> {
    let value = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        let request: PauseRequest =
            serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;
        Some(request.paused)
    };
    Ok(TimerResponse(state.timer.pause(value).await?))
}

/// Live event stream: the current state first, then every broadcast event.
async fn stream_timer(
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // The broadcaster stays parked at the snapshot's place in the event
    // order until this client is registered.
    let (snapshot, checkpoint) = state.timer.checkpoint(&BROADCAST_EVENTS).await?;
    let parked = checkpoint.reached().await;
    let (id, rx) = state.clients.subscribe().await;
    drop(parked);
    let guard = ClientGuard::new(state.clients.clone(), id);
    debug!(client_id = id, "Stream subscriber connected");

    let initial = StreamMessage::snapshot(EVENT_TIMER, &snapshot);
    let updates = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        rx.recv().await.map(|message| (message, (rx, guard)))
    });

    let events = stream::once(async move { initial })
        .chain(updates)
        .map(|message| Ok(Event::default().event(message.event).data(message.data)));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
