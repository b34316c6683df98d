//! JSON bodies of the HTTP API.

use pomo_core::TimerMode;
use serde::{Deserialize, Serialize};

/// Body of `POST /api/timer`: every field is optional and merged into the
/// engine state.
///
/// A `mode` different from the current one re-seeds the remaining time
/// from that mode's configured duration and wins over `remaining_ms`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<TimerMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_ms: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_sessions: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
}

impl TimerUpdate {
    /// An update that overwrites every field with `state`.
    pub fn from_state(state: &pomo_core::TimerState) -> Self {
        Self {
            mode: Some(state.mode),
            remaining_ms: Some(state.remaining.num_milliseconds()),
            completed_sessions: Some(state.completed_sessions),
            paused: Some(state.paused),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Optional body of `POST /api/timer/pause`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseRequest {
    pub paused: bool,
}
