//! Mutable timer state.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::mode::TimerMode;

/// The data of the timer state machine.
///
/// `remaining` may go negative when the tick interval overshoots zero;
/// the engine switches mode on the next `before_tick` in that case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerState {
    pub mode: TimerMode,

    /// Time left in the current mode
    #[serde(rename = "remaining_ms", with = "crate::duration::serde_millis")]
    pub remaining: TimeDelta,

    /// Work sessions completed in the current cycle
    pub completed_sessions: u32,

    pub paused: bool,
}

impl Default for TimerState {
    fn default() -> Self {
        Self {
            mode: TimerMode::Work,
            remaining: TimeDelta::zero(),
            completed_sessions: 0,
            paused: false,
        }
    }
}

impl TimerState {
    /// Returns true when the state carries no information (the zero value).
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Returns true when the current mode has run out.
    pub fn is_expired(&self) -> bool {
        self.remaining <= TimeDelta::zero()
    }
}
