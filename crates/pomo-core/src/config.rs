//! Timer configuration.
//!
//! A `TimerConfig` is built once per daemon generation and never mutated
//! afterwards; a reload constructs a new one. In TOML it is the `[timer]`
//! table:
//!
//! ```toml
//! [timer]
//! sessions = 4
//! paused = false
//! tick = "1s"
//!
//! [timer.durations]
//! work = "25m"
//! short-break = "5m"
//! long-break = "30m"
//! ```

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::duration::serde_text;
use crate::error::{DomainError, DomainResult};
use crate::mode::TimerMode;

/// Longest accepted tick interval.
pub const MAX_TICK_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Configured length of each mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ModeDurations {
    #[serde(with = "serde_text")]
    pub work: Duration,
    #[serde(with = "serde_text")]
    pub short_break: Duration,
    #[serde(with = "serde_text")]
    pub long_break: Duration,
}

impl Default for ModeDurations {
    fn default() -> Self {
        Self {
            work: Duration::from_secs(25 * 60),
            short_break: Duration::from_secs(5 * 60),
            long_break: Duration::from_secs(30 * 60),
        }
    }
}

impl ModeDurations {
    /// Returns the configured length of `mode`.
    pub fn get(&self, mode: TimerMode) -> Duration {
        match mode {
            TimerMode::Work => self.work,
            TimerMode::ShortBreak => self.short_break,
            TimerMode::LongBreak => self.long_break,
        }
    }
}

/// Immutable per-generation timer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Work sessions before a long break
    #[serde(rename = "sessions")]
    pub sessions_per_cycle: u32,

    pub durations: ModeDurations,

    #[serde(rename = "tick", with = "serde_text")]
    pub tick_interval: Duration,

    /// Whether `init()` starts the timer paused
    #[serde(rename = "paused")]
    pub initially_paused: bool,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            sessions_per_cycle: 4,
            durations: ModeDurations::default(),
            tick_interval: Duration::from_secs(1),
            initially_paused: false,
        }
    }
}

impl TimerConfig {
    /// Checks every value is in range.
    pub fn validate(&self) -> DomainResult<()> {
        if self.sessions_per_cycle == 0 {
            return Err(DomainError::config("sessions", "must be at least 1"));
        }

        for mode in TimerMode::ALL {
            let duration = self.durations.get(mode);
            if duration.is_zero() {
                return Err(DomainError::config(
                    format!("durations.{}", mode.as_str()),
                    "must be greater than zero",
                ));
            }
            if TimeDelta::from_std(duration).is_err() {
                return Err(DomainError::config(
                    format!("durations.{}", mode.as_str()),
                    "is too large",
                ));
            }
        }

        if self.tick_interval.is_zero() {
            return Err(DomainError::config("tick", "must be greater than zero"));
        }
        if self.tick_interval > MAX_TICK_INTERVAL {
            return Err(DomainError::config("tick", "must be at most 1h"));
        }

        Ok(())
    }

    /// Returns the configured length of `mode` as a signed delta.
    pub fn duration_of(&self, mode: TimerMode) -> TimeDelta {
        TimeDelta::from_std(self.durations.get(mode)).unwrap_or(TimeDelta::MAX)
    }

    /// Returns the tick interval as a signed delta.
    pub fn tick_delta(&self) -> TimeDelta {
        TimeDelta::from_std(self.tick_interval).unwrap_or(TimeDelta::zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TimerConfig::default();
        assert_eq!(config.sessions_per_cycle, 4);
        assert_eq!(config.duration_of(TimerMode::Work), TimeDelta::minutes(25));
        assert_eq!(config.duration_of(TimerMode::ShortBreak), TimeDelta::minutes(5));
        assert_eq!(config.duration_of(TimerMode::LongBreak), TimeDelta::minutes(30));
        assert_eq!(config.tick_delta(), TimeDelta::seconds(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_table() {
        let config: TimerConfig = toml::from_str(
            r#"
            sessions = 2
            paused = true
            tick = "250ms"

            [durations]
            work = "50m"
            long-break = "1h"
            "#,
        )
        .unwrap();

        assert_eq!(config.sessions_per_cycle, 2);
        assert!(config.initially_paused);
        assert_eq!(config.tick_interval, Duration::from_millis(250));
        assert_eq!(config.durations.work, Duration::from_secs(50 * 60));
        // Unset keys keep their defaults
        assert_eq!(config.durations.short_break, Duration::from_secs(5 * 60));
        assert_eq!(config.durations.long_break, Duration::from_secs(60 * 60));
    }

    #[test]
    fn test_toml_rejects_bad_duration() {
        let result: Result<TimerConfig, _> = toml::from_str("tick = \"soon\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_ranges() {
        let mut config = TimerConfig {
            sessions_per_cycle: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.sessions_per_cycle = 1;
        config.durations.short_break = Duration::ZERO;
        assert!(config.validate().is_err());

        config.durations.short_break = Duration::from_secs(60);
        config.tick_interval = Duration::from_secs(2 * 60 * 60);
        assert!(config.validate().is_err());

        config.tick_interval = Duration::from_millis(10);
        assert!(config.validate().is_ok());
    }
}
