//! Immutable engine snapshots.
//!
//! A snapshot is a copy of the engine's state plus an echo of its
//! configuration, taken at the moment an event fires. Subscribers only ever
//! see snapshots, never the live engine.

use serde::{Deserialize, Serialize};

use crate::config::TimerConfig;
use crate::duration::{format_duration, format_duration_exact};
use crate::state::TimerState;

/// Field names reported by the `timer` control verb, in output order.
pub const TIMER_FIELDS: [&str; 6] = [
    "mode",
    "remaining",
    "completed_sessions",
    "paused",
    "sessions_per_cycle",
    "tick_interval",
];

/// Mode lengths in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationsView {
    pub work_ms: u64,
    pub short_break_ms: u64,
    pub long_break_ms: u64,
}

/// Configuration echo carried in every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigView {
    pub sessions_per_cycle: u32,
    pub durations: DurationsView,
    pub tick_interval_ms: u64,
    pub initially_paused: bool,
}

impl From<&TimerConfig> for ConfigView {
    fn from(config: &TimerConfig) -> Self {
        let millis = |d: std::time::Duration| u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
        Self {
            sessions_per_cycle: config.sessions_per_cycle,
            durations: DurationsView {
                work_ms: millis(config.durations.work),
                short_break_ms: millis(config.durations.short_break),
                long_break_ms: millis(config.durations.long_break),
            },
            tick_interval_ms: millis(config.tick_interval),
            initially_paused: config.initially_paused,
        }
    }
}

/// Engine state and configuration at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSnapshot {
    #[serde(flatten)]
    pub state: TimerState,
    pub config: ConfigView,
}

impl TimerSnapshot {
    pub fn new(state: TimerState, config: &TimerConfig) -> Self {
        Self {
            state,
            config: ConfigView::from(config),
        }
    }

    /// Returns the public fields as `(name, value)` pairs, in `TIMER_FIELDS` order.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        TIMER_FIELDS
            .iter()
            .filter_map(|name| self.field(name).map(|value| (*name, value)))
            .collect()
    }

    /// Returns one field rendered for humans, or `None` if no such field exists.
    pub fn field(&self, name: &str) -> Option<String> {
        let value = match name {
            "mode" => self.state.mode.label().to_string(),
            "remaining" => format_duration(self.state.remaining),
            "completed_sessions" => self.state.completed_sessions.to_string(),
            "paused" => self.state.paused.to_string(),
            "sessions_per_cycle" => self.config.sessions_per_cycle.to_string(),
            "tick_interval" => format_duration_exact(std::time::Duration::from_millis(
                self.config.tick_interval_ms,
            )),
            _ => return None,
        };
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::TimerMode;
    use chrono::TimeDelta;

    fn sample() -> TimerSnapshot {
        let state = TimerState {
            mode: TimerMode::ShortBreak,
            remaining: TimeDelta::seconds(299),
            completed_sessions: 1,
            paused: false,
        };
        TimerSnapshot::new(state, &TimerConfig::default())
    }

    #[test]
    fn test_fields_cover_every_name() {
        let fields = sample().fields();
        let names: Vec<_> = fields.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, TIMER_FIELDS.to_vec());
    }

    #[test]
    fn test_field_rendering() {
        let snapshot = sample();
        assert_eq!(snapshot.field("mode").as_deref(), Some("Short Break"));
        assert_eq!(snapshot.field("remaining").as_deref(), Some("4m59s"));
        assert_eq!(snapshot.field("tick_interval").as_deref(), Some("1s"));
        assert_eq!(snapshot.field("nope"), None);
    }

    #[test]
    fn test_json_is_flat() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["mode"], "short-break");
        assert_eq!(value["remaining_ms"], 299_000);
        assert_eq!(value["config"]["sessions_per_cycle"], 4);
        assert_eq!(value["config"]["durations"]["work_ms"], 1_500_000);
    }
}
