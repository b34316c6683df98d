//! Timer modes.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::DomainError;

/// The three phases of a pomodoro cycle.
///
/// Cyclic order: `Work -> (ShortBreak | LongBreak) -> Work`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimerMode {
    /// A focused work period (a "pomodoro")
    #[default]
    #[serde(alias = "pomodoro")]
    Work,

    /// Break between two work periods
    #[serde(alias = "short_break")]
    ShortBreak,

    /// Break after a full cycle of work periods
    #[serde(alias = "long_break")]
    LongBreak,
}

impl TimerMode {
    /// All modes in ordinal order.
    pub const ALL: [TimerMode; 3] = [Self::Work, Self::ShortBreak, Self::LongBreak];

    /// Returns the ordinal of this mode (Work = 0).
    pub fn ordinal(self) -> u8 {
        match self {
            Self::Work => 0,
            Self::ShortBreak => 1,
            Self::LongBreak => 2,
        }
    }

    /// Returns the wire name (kebab-case).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Work => "work",
            Self::ShortBreak => "short-break",
            Self::LongBreak => "long-break",
        }
    }

    /// Returns the human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Work => "Work",
            Self::ShortBreak => "Short Break",
            Self::LongBreak => "Long Break",
        }
    }

    /// Returns true for either break mode.
    pub fn is_break(self) -> bool {
        !matches!(self, Self::Work)
    }

    /// Parses a mode from its wire name, snake_case name, label or ordinal.
    pub fn from_name(name: &str) -> Result<Self, DomainError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "work" | "pomodoro" | "0" => Ok(Self::Work),
            "short-break" | "short_break" | "short break" | "1" => Ok(Self::ShortBreak),
            "long-break" | "long_break" | "long break" | "2" => Ok(Self::LongBreak),
            _ => Err(DomainError::UnknownMode(name.to_string())),
        }
    }
}

impl fmt::Display for TimerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!(TimerMode::from_name("work"), Ok(TimerMode::Work));
        assert_eq!(TimerMode::from_name("Pomodoro"), Ok(TimerMode::Work));
        assert_eq!(TimerMode::from_name("short_break"), Ok(TimerMode::ShortBreak));
        assert_eq!(TimerMode::from_name("Long Break"), Ok(TimerMode::LongBreak));
        assert_eq!(TimerMode::from_name("2"), Ok(TimerMode::LongBreak));
        assert!(TimerMode::from_name("nap").is_err());
    }

    #[test]
    fn test_mode_serde_names() {
        let json = serde_json::to_string(&TimerMode::ShortBreak).unwrap();
        assert_eq!(json, "\"short-break\"");

        let mode: TimerMode = serde_json::from_str("\"pomodoro\"").unwrap();
        assert_eq!(mode, TimerMode::Work);
    }

    #[test]
    fn test_mode_ordinals_follow_all() {
        for (i, mode) in TimerMode::ALL.iter().enumerate() {
            assert_eq!(usize::from(mode.ordinal()), i);
        }
        assert!(TimerMode::LongBreak.is_break());
        assert!(!TimerMode::Work.is_break());
    }
}
