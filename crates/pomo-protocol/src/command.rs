//! Control command grammar.
//!
//! One command per line, whitespace separated, case-sensitive verbs:
//!
//! ```text
//! pause [0|1]          toggle, or set explicitly
//! seek <duration>      absolute; `+`/`-` prefix makes it relative
//! reset                re-seed remaining time of the current mode
//! next | skip          advance to the next mode
//! prev                 go back to the previous mode
//! sessions <n|+n|-n>   set the completed-session counter
//! init                 restart the whole cycle
//! timer [field]        dump the public timer fields
//! commands             list the verbs above
//! ```
//!
//! Parsing never touches the engine; it only produces a [`Command`].

use chrono::TimeDelta;
use pomo_core::parse_duration;
use std::fmt::Write as _;
use thiserror::Error;

// ============================================================================
// Verb table
// ============================================================================

pub const PAUSE: &str = "pause";
pub const SEEK: &str = "seek";
pub const RESET: &str = "reset";
pub const INIT: &str = "init";
pub const PREV: &str = "prev";
pub const NEXT: &str = "next";
pub const SKIP: &str = "skip";
pub const SESSIONS: &str = "sessions";
pub const TIMER: &str = "timer";
pub const COMMANDS: &str = "commands";

/// A recognized verb and how many arguments it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerbSpec {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
}

impl VerbSpec {
    const fn new(name: &'static str, min_args: usize, max_args: usize) -> Self {
        Self {
            name,
            min_args,
            max_args,
        }
    }

    /// Verbs with a fixed, non-zero arity report "wrong number"; the rest
    /// report "too many".
    fn check_arity(&self, count: usize) -> Result<(), CommandError> {
        if count >= self.min_args && count <= self.max_args {
            return Ok(());
        }
        if self.min_args == self.max_args && self.min_args > 0 {
            Err(CommandError::WrongArity(self.name.to_string()))
        } else {
            Err(CommandError::TooManyArguments(self.name.to_string()))
        }
    }
}

/// Every verb the parser accepts, in listing order.
pub const VERBS: &[VerbSpec] = &[
    VerbSpec::new(PAUSE, 0, 1),
    VerbSpec::new(SEEK, 1, 1),
    VerbSpec::new(RESET, 0, 0),
    VerbSpec::new(INIT, 0, 0),
    VerbSpec::new(PREV, 0, 0),
    VerbSpec::new(NEXT, 0, 0),
    VerbSpec::new(SKIP, 0, 0),
    VerbSpec::new(SESSIONS, 1, 1),
    VerbSpec::new(TIMER, 0, 1),
    VerbSpec::new(COMMANDS, 0, 0),
];

fn verb_spec(name: &str) -> Option<&'static VerbSpec> {
    VERBS.iter().find(|spec| spec.name == name)
}

/// Renders the `commands` verb output: one `command: <verb>` line per verb.
pub fn commands_listing() -> String {
    let mut out = String::new();
    for spec in VERBS {
        let _ = writeln!(out, "command: {}", spec.name);
    }
    out
}

// ============================================================================
// Commands
// ============================================================================

/// Target of a `seek`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekTarget {
    Absolute(TimeDelta),
    Relative(TimeDelta),
}

/// Argument of `sessions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionsArg {
    Absolute(u32),
    Add(u32),
    Sub(u32),
}

impl SessionsArg {
    /// Applies the argument to `current`; subtraction saturates at zero.
    pub fn apply(self, current: u32) -> u32 {
        match self {
            Self::Absolute(n) => n,
            Self::Add(n) => current.saturating_add(n),
            Self::Sub(n) => current.saturating_sub(n),
        }
    }
}

/// A parsed control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `None` toggles
    Pause(Option<bool>),
    Seek(SeekTarget),
    Reset,
    Next,
    Prev,
    Sessions(SessionsArg),
    Init,
    /// `None` dumps every field
    Timer(Option<String>),
    Commands,
}

impl Command {
    /// Parses one command line.
    ///
    /// The returned error knows which verb it belongs to, for `ACK {verb}`.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or_default();
        let args: Vec<&str> = words.collect();

        let spec = verb_spec(verb).ok_or_else(|| CommandError::NotFound(verb.to_string()))?;
        spec.check_arity(args.len())?;
        let first = args.first().copied();

        let command = match spec.name {
            PAUSE => Self::Pause(first.map(parse_bool).transpose()?),
            SEEK => Self::Seek(parse_seek(first.unwrap_or_default())?),
            RESET => Self::Reset,
            INIT => Self::Init,
            PREV => Self::Prev,
            NEXT | SKIP => Self::Next,
            SESSIONS => Self::Sessions(parse_sessions(first.unwrap_or_default())?),
            TIMER => Self::Timer(first.map(str::to_string)),
            COMMANDS => Self::Commands,
            other => return Err(CommandError::NotFound(other.to_string())),
        };
        Ok(command)
    }

    /// Returns the canonical verb of this command.
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Pause(_) => PAUSE,
            Self::Seek(_) => SEEK,
            Self::Reset => RESET,
            Self::Next => NEXT,
            Self::Prev => PREV,
            Self::Sessions(_) => SESSIONS,
            Self::Init => INIT,
            Self::Timer(_) => TIMER,
            Self::Commands => COMMANDS,
        }
    }
}

fn parse_bool(input: &str) -> Result<bool, CommandError> {
    match input {
        "1" => Ok(true),
        "0" => Ok(false),
        _ => Err(CommandError::InvalidBool(input.to_string())),
    }
}

fn parse_seek(input: &str) -> Result<SeekTarget, CommandError> {
    let delta = parse_duration(input).map_err(|e| CommandError::InvalidDuration {
        input: input.to_string(),
        reason: e.to_string(),
    })?;
    if input.starts_with('+') || input.starts_with('-') {
        Ok(SeekTarget::Relative(delta))
    } else {
        Ok(SeekTarget::Absolute(delta))
    }
}

fn parse_sessions(input: &str) -> Result<SessionsArg, CommandError> {
    let number = |digits: &str| {
        digits
            .parse::<u32>()
            .map_err(|_| CommandError::InvalidNumber(input.to_string()))
    };
    if let Some(rest) = input.strip_prefix('+') {
        Ok(SessionsArg::Add(number(rest)?))
    } else if let Some(rest) = input.strip_prefix('-') {
        Ok(SessionsArg::Sub(number(rest)?))
    } else {
        Ok(SessionsArg::Absolute(number(input)?))
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors produced while parsing or executing a control command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("command not found {0:?}")]
    NotFound(String),

    #[error("too many arguments for {0:?}")]
    TooManyArguments(String),

    #[error("wrong number of arguments for {0:?}")]
    WrongArity(String),

    #[error("boolean (0/1) expected: {0:?}")]
    InvalidBool(String),

    #[error("invalid duration {input:?}: {reason}")]
    InvalidDuration { input: String, reason: String },

    #[error("invalid number {0:?}")]
    InvalidNumber(String),

    #[error("field doesn't exist on timer: {0:?}")]
    UnknownField(String),
}

impl CommandError {
    /// Verb to report in `ACK {verb}`; empty when the verb itself was unknown.
    pub fn verb(&self) -> &str {
        match self {
            Self::NotFound(_) => "",
            Self::TooManyArguments(verb) | Self::WrongArity(verb) => verb,
            Self::InvalidBool(_) => PAUSE,
            Self::InvalidDuration { .. } => SEEK,
            Self::InvalidNumber(_) => SESSIONS,
            Self::UnknownField(_) => TIMER,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_parse_zero_arg_verbs() {
        assert_eq!(Command::parse("reset"), Ok(Command::Reset));
        assert_eq!(Command::parse("init"), Ok(Command::Init));
        assert_eq!(Command::parse("prev"), Ok(Command::Prev));
        assert_eq!(Command::parse("next"), Ok(Command::Next));
        assert_eq!(Command::parse("skip"), Ok(Command::Next));
        assert_eq!(Command::parse("commands"), Ok(Command::Commands));
        assert_eq!(Command::parse("  timer  "), Ok(Command::Timer(None)));
    }

    #[test]
    fn test_parse_pause() {
        assert_eq!(Command::parse("pause"), Ok(Command::Pause(None)));
        assert_eq!(Command::parse("pause 1"), Ok(Command::Pause(Some(true))));
        assert_eq!(Command::parse("pause 0"), Ok(Command::Pause(Some(false))));

        let err = Command::parse("pause true").unwrap_err();
        assert_eq!(err, CommandError::InvalidBool("true".to_string()));
        assert_eq!(err.to_string(), "boolean (0/1) expected: \"true\"");
        assert_eq!(err.verb(), "pause");
    }

    #[test]
    fn test_parse_seek() {
        assert_eq!(
            Command::parse("seek 10m"),
            Ok(Command::Seek(SeekTarget::Absolute(TimeDelta::minutes(10))))
        );
        assert_eq!(
            Command::parse("seek +30s"),
            Ok(Command::Seek(SeekTarget::Relative(TimeDelta::seconds(30))))
        );
        assert_eq!(
            Command::parse("seek -1m"),
            Ok(Command::Seek(SeekTarget::Relative(TimeDelta::minutes(-1))))
        );
        assert!(matches!(
            Command::parse("seek soon"),
            Err(CommandError::InvalidDuration { .. })
        ));
    }

    #[test]
    fn test_parse_sessions() {
        assert_eq!(
            Command::parse("sessions 3"),
            Ok(Command::Sessions(SessionsArg::Absolute(3)))
        );
        assert_eq!(
            Command::parse("sessions +2"),
            Ok(Command::Sessions(SessionsArg::Add(2)))
        );
        assert_eq!(
            Command::parse("sessions -1"),
            Ok(Command::Sessions(SessionsArg::Sub(1)))
        );
        assert_eq!(
            Command::parse("sessions x"),
            Err(CommandError::InvalidNumber("x".to_string()))
        );
        assert_eq!(SessionsArg::Sub(5).apply(2), 0);
        assert_eq!(SessionsArg::Add(1).apply(2), 3);
    }

    #[test]
    fn test_arity_errors() {
        let err = Command::parse("reset now").unwrap_err();
        assert_eq!(err.to_string(), "too many arguments for \"reset\"");
        assert_eq!(err.verb(), "reset");

        let err = Command::parse("seek").unwrap_err();
        assert_eq!(err.to_string(), "wrong number of arguments for \"seek\"");

        let err = Command::parse("sessions 1 2").unwrap_err();
        assert_eq!(err, CommandError::WrongArity("sessions".to_string()));

        let err = Command::parse("pause 1 0").unwrap_err();
        assert_eq!(err, CommandError::TooManyArguments("pause".to_string()));
    }

    #[test]
    fn test_unknown_verb() {
        let err = Command::parse("jump 5").unwrap_err();
        assert_eq!(err.to_string(), "command not found \"jump\"");
        assert_eq!(err.verb(), "");

        // Verbs are case-sensitive
        assert!(Command::parse("PAUSE").is_err());
        assert_eq!(
            Command::parse("").unwrap_err(),
            CommandError::NotFound(String::new())
        );
    }

    #[test]
    fn test_listing_matches_parser() {
        let listed: BTreeSet<String> = commands_listing()
            .lines()
            .filter_map(|line| line.strip_prefix("command: "))
            .map(str::to_string)
            .collect();

        // Every listed verb parses with its minimum arity
        for verb in &listed {
            let line = match verb.as_str() {
                SEEK => "seek 1m".to_string(),
                SESSIONS => "sessions 1".to_string(),
                other => other.to_string(),
            };
            assert!(Command::parse(&line).is_ok(), "listed verb {verb} rejected");
        }

        // Every verb the parser knows is listed
        let table: BTreeSet<String> = VERBS.iter().map(|spec| spec.name.to_string()).collect();
        assert_eq!(listed, table);
        for candidate in [
            "pause", "seek", "reset", "next", "skip", "prev", "sessions", "init", "timer",
            "commands",
        ] {
            assert!(listed.contains(candidate), "{candidate} missing from listing");
        }
        assert_eq!(listed.len(), 10);
    }
}
