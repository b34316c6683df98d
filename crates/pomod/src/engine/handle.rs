//! Client interface for the timer actor.
//!
//! `TimerHandle` is cheap to clone and shared by every connection handler,
//! HTTP route and satellite task of a generation.

use chrono::TimeDelta;
use tokio::sync::{mpsc, oneshot};

use pomo_core::{EventKind, TimerSnapshot, TimerState};
use pomo_protocol::{SessionsArg, TimerUpdate};

use super::commands::{TimerCommand, TimerError, TimerOp};
use crate::hooks::Checkpoint;

/// Handle for interacting with the timer actor.
#[derive(Clone, Debug)]
pub struct TimerHandle {
    sender: mpsc::Sender<TimerCommand>,
}

impl TimerHandle {
    pub fn new(sender: mpsc::Sender<TimerCommand>) -> Self {
        Self { sender }
    }

    /// Applies `op` and returns the state right after it.
    ///
    /// # Errors
    ///
    /// - `TimerError::ChannelClosed` if the actor has shut down
    pub async fn apply(&self, op: TimerOp) -> Result<TimerSnapshot, TimerError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(TimerCommand::Apply { op, respond_to: tx })
            .await
            .map_err(|_| TimerError::ChannelClosed)?;

        rx.await.map_err(|_| TimerError::ChannelClosed)
    }

    /// Returns the current state.
    pub async fn snapshot(&self) -> Result<TimerSnapshot, TimerError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(TimerCommand::GetSnapshot { respond_to: tx })
            .await
            .map_err(|_| TimerError::ChannelClosed)?;

        rx.await.map_err(|_| TimerError::ChannelClosed)
    }

    /// Returns the current state together with a [`Checkpoint`] placed at
    /// the same point of the event order, for subscribers of `kinds`.
    pub async fn checkpoint(
        &self,
        kinds: &[EventKind],
    ) -> Result<(TimerSnapshot, Checkpoint), TimerError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(TimerCommand::Checkpoint {
                kinds: kinds.to_vec(),
                respond_to: tx,
            })
            .await
            .map_err(|_| TimerError::ChannelClosed)?;

        rx.await.map_err(|_| TimerError::ChannelClosed)
    }

    pub async fn init(&self) -> Result<TimerSnapshot, TimerError> {
        self.apply(TimerOp::Init).await
    }

    pub async fn reset(&self) -> Result<TimerSnapshot, TimerError> {
        self.apply(TimerOp::Reset).await
    }

    pub async fn next(&self) -> Result<TimerSnapshot, TimerError> {
        self.apply(TimerOp::Next).await
    }

    pub async fn prev(&self) -> Result<TimerSnapshot, TimerError> {
        self.apply(TimerOp::Prev).await
    }

    /// Sets the paused flag, or toggles it with `None`.
    pub async fn pause(&self, paused: Option<bool>) -> Result<TimerSnapshot, TimerError> {
        self.apply(TimerOp::Pause(paused)).await
    }

    pub async fn seek_to(&self, remaining: TimeDelta) -> Result<TimerSnapshot, TimerError> {
        self.apply(TimerOp::SeekTo(remaining)).await
    }

    pub async fn seek_add(&self, delta: TimeDelta) -> Result<TimerSnapshot, TimerError> {
        self.apply(TimerOp::SeekAdd(delta)).await
    }

    pub async fn sessions(&self, arg: SessionsArg) -> Result<TimerSnapshot, TimerError> {
        self.apply(TimerOp::Sessions(arg)).await
    }

    pub async fn update(&self, update: TimerUpdate) -> Result<TimerSnapshot, TimerError> {
        self.apply(TimerOp::Update(update)).await
    }

    pub async fn mirror(
        &self,
        kind: EventKind,
        state: TimerState,
    ) -> Result<TimerSnapshot, TimerError> {
        self.apply(TimerOp::Mirror { kind, state }).await
    }
}
