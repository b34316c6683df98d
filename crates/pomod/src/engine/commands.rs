//! Timer actor commands and errors.

use chrono::TimeDelta;
use thiserror::Error;
use tokio::sync::oneshot;

use pomo_core::{EventKind, TimerSnapshot, TimerState};
use pomo_protocol::{SessionsArg, TimerUpdate};

use crate::hooks::Checkpoint;

// ============================================================================
// Operations
// ============================================================================

/// A state-changing operation on the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOp {
    Init,
    Reset,
    Next,
    Prev,
    /// `None` toggles
    Pause(Option<bool>),
    SeekTo(TimeDelta),
    SeekAdd(TimeDelta),
    Sessions(SessionsArg),
    Update(TimerUpdate),
    /// Adopt a state pushed by the remote authority (satellite mode)
    Mirror { kind: EventKind, state: TimerState },
}

// ============================================================================
// Actor Commands
// ============================================================================

/// Commands sent to the timer actor.
///
/// Each command carries a oneshot sender for the resulting snapshot.
#[derive(Debug)]
pub enum TimerCommand {
    /// Apply an operation and reply with the state after it.
    Apply {
        op: TimerOp,
        respond_to: oneshot::Sender<TimerSnapshot>,
    },

    /// Read the current state.
    GetSnapshot {
        respond_to: oneshot::Sender<TimerSnapshot>,
    },

    /// Read the current state and mark the same point in the queues of
    /// every subscriber of `kinds`.
    Checkpoint {
        kinds: Vec<EventKind>,
        respond_to: oneshot::Sender<(TimerSnapshot, Checkpoint)>,
    },
}

// ============================================================================
// Errors
// ============================================================================

/// Errors talking to the timer actor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimerError {
    /// The actor has stopped (generation shut down)
    #[error("Timer actor channel closed")]
    ChannelClosed,
}
