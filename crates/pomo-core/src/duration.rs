//! Textual durations.
//!
//! Durations are written the way operators type them: a signed sequence of
//! decimal numbers, each with a unit suffix, such as `25m`, `1h30m`, `-2.5s`
//! or `300ms`. Valid units are `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`.
//!
//! Two formatters exist:
//! - [`format_duration`] rounds to whole seconds (`25m0s`), used for the
//!   remaining time shown to humans
//! - [`format_duration_exact`] keeps millisecond precision (`1.5s`, `10ms`),
//!   used for configuration values such as the tick interval

use chrono::TimeDelta;
use std::fmt::Write as _;
use std::time::Duration;

use crate::error::DomainError;

const NANOS_PER_SECOND: i128 = 1_000_000_000;

/// Parses a signed duration string into a `TimeDelta`.
pub fn parse_duration(input: &str) -> Result<TimeDelta, DomainError> {
    let invalid = |reason: &str| DomainError::InvalidDuration {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = input.trim();
    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    if body == "0" {
        return Ok(TimeDelta::zero());
    }
    if body.is_empty() {
        return Err(invalid("empty duration"));
    }

    let mut total: i128 = 0;
    let mut chars = body.chars().peekable();

    while chars.peek().is_some() {
        let mut whole: i128 = 0;
        let mut whole_digits = 0usize;
        while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
            whole = whole
                .checked_mul(10)
                .and_then(|w| w.checked_add(i128::from(d)))
                .ok_or_else(|| invalid("duration out of range"))?;
            whole_digits += 1;
            chars.next();
        }

        // Fraction digits beyond nanosecond precision are ignored
        let mut frac: i128 = 0;
        let mut scale: i128 = 1;
        let mut frac_digits = 0usize;
        if chars.peek() == Some(&'.') {
            chars.next();
            while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
                if scale < NANOS_PER_SECOND {
                    frac = frac * 10 + i128::from(d);
                    scale *= 10;
                }
                frac_digits += 1;
                chars.next();
            }
        }

        if whole_digits == 0 && frac_digits == 0 {
            return Err(invalid("expected a number"));
        }

        let mut unit = String::new();
        while let Some(&c) = chars.peek() {
            if c == '.' || c.is_ascii_digit() {
                break;
            }
            unit.push(c);
            chars.next();
        }

        let nanos_per_unit: i128 = match unit.as_str() {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => NANOS_PER_SECOND,
            "m" => 60 * NANOS_PER_SECOND,
            "h" => 3_600 * NANOS_PER_SECOND,
            "" => return Err(invalid("missing unit")),
            other => return Err(invalid(&format!("unknown unit {other:?}"))),
        };

        let component = whole
            .checked_mul(nanos_per_unit)
            .and_then(|w| w.checked_add(frac * nanos_per_unit / scale))
            .ok_or_else(|| invalid("duration out of range"))?;
        total = total
            .checked_add(component)
            .ok_or_else(|| invalid("duration out of range"))?;
    }

    let nanos = i64::try_from(total).map_err(|_| invalid("duration out of range"))?;
    let delta = TimeDelta::nanoseconds(nanos);
    Ok(if negative { -delta } else { delta })
}

/// Parses a non-negative duration string into a `std::time::Duration`.
pub fn parse_std_duration(input: &str) -> Result<Duration, DomainError> {
    parse_duration(input)?
        .to_std()
        .map_err(|_| DomainError::InvalidDuration {
            input: input.to_string(),
            reason: "duration must not be negative".to_string(),
        })
}

/// Formats a duration rounded to whole seconds, e.g. `25m0s`, `1h0m0s`, `-3s`.
///
/// Halves round away from zero.
pub fn format_duration(delta: TimeDelta) -> String {
    let millis = delta.num_milliseconds();
    let secs = (millis.unsigned_abs() + 500) / 1000;
    if secs == 0 {
        return "0s".to_string();
    }

    let mut out = String::new();
    if millis < 0 {
        out.push('-');
    }
    write_hms(&mut out, secs, 0);
    out
}

/// Formats a duration with millisecond precision, e.g. `1.5s`, `10ms`, `5m0s`.
pub fn format_duration_exact(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis == 0 {
        return "0s".to_string();
    }
    if millis < 1000 {
        return format!("{millis}ms");
    }

    let secs = u64::try_from(millis / 1000).unwrap_or(u64::MAX);
    let rem_millis = (millis % 1000) as u32;
    let mut out = String::new();
    write_hms(&mut out, secs, rem_millis);
    out
}

fn write_hms(out: &mut String, secs: u64, rem_millis: u32) {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        let _ = write!(out, "{hours}h{minutes}m");
    } else if minutes > 0 {
        let _ = write!(out, "{minutes}m");
    }

    if rem_millis == 0 {
        let _ = write!(out, "{seconds}s");
    } else {
        let frac = format!("{rem_millis:03}");
        let _ = write!(out, "{seconds}.{}s", frac.trim_end_matches('0'));
    }
}

/// Serde adapter: `TimeDelta` as signed integer milliseconds.
pub mod serde_millis {
    use chrono::TimeDelta;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(delta: &TimeDelta, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(delta.num_milliseconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<TimeDelta, D::Error> {
        let millis = i64::deserialize(deserializer)?;
        TimeDelta::try_milliseconds(millis)
            .ok_or_else(|| serde::de::Error::custom("milliseconds out of range"))
    }
}

/// Serde adapter: `std::time::Duration` as a duration string (`"25m"`).
pub mod serde_text {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration_exact(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::parse_std_duration(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_units() {
        assert_eq!(parse_duration("25m").unwrap(), TimeDelta::minutes(25));
        assert_eq!(parse_duration("1h30m").unwrap(), TimeDelta::minutes(90));
        assert_eq!(parse_duration("300ms").unwrap(), TimeDelta::milliseconds(300));
        assert_eq!(parse_duration("0").unwrap(), TimeDelta::zero());
        assert_eq!(parse_duration("2us").unwrap(), TimeDelta::microseconds(2));
    }

    #[test]
    fn test_parse_sign_and_fraction() {
        assert_eq!(parse_duration("-2.5s").unwrap(), TimeDelta::milliseconds(-2500));
        assert_eq!(parse_duration("+1.5h").unwrap(), TimeDelta::minutes(90));
        assert_eq!(parse_duration(".5s").unwrap(), TimeDelta::milliseconds(500));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("m").is_err());
        assert!(parse_duration("-").is_err());
        assert!(parse_duration("99999999999999h").is_err());
    }

    #[test]
    fn test_parse_std_rejects_negative() {
        assert_eq!(parse_std_duration("5m").unwrap(), Duration::from_secs(300));
        assert!(parse_std_duration("-5m").is_err());
    }

    #[test]
    fn test_format_rounds_to_seconds() {
        assert_eq!(format_duration(TimeDelta::minutes(25)), "25m0s");
        assert_eq!(format_duration(TimeDelta::hours(1)), "1h0m0s");
        assert_eq!(format_duration(TimeDelta::milliseconds(1499)), "1s");
        assert_eq!(format_duration(TimeDelta::milliseconds(1500)), "2s");
        assert_eq!(format_duration(TimeDelta::milliseconds(-3000)), "-3s");
        assert_eq!(format_duration(TimeDelta::milliseconds(400)), "0s");
    }

    #[test]
    fn test_format_exact() {
        assert_eq!(format_duration_exact(Duration::from_millis(10)), "10ms");
        assert_eq!(format_duration_exact(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration_exact(Duration::from_secs(300)), "5m0s");
        assert_eq!(format_duration_exact(Duration::ZERO), "0s");
    }
}
