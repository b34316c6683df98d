//! Control command execution.
//!
//! Turns a parsed [`Command`] into timer operations and renders the textual
//! reply. Parsing itself lives in `pomo_protocol`; this module only adds the
//! engine round-trip.

use std::fmt::Write as _;

use thiserror::Error;

use pomo_protocol::{commands_listing, reply, Command, CommandError, SeekTarget};

use crate::engine::{TimerError, TimerHandle, TimerOp};

/// Errors from executing one control line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("timer unavailable: {source}")]
    Timer {
        verb: &'static str,
        #[source]
        source: TimerError,
    },
}

impl ControlError {
    /// Verb to report in `ACK {verb}`.
    pub fn verb(&self) -> &str {
        match self {
            Self::Command(e) => e.verb(),
            Self::Timer { verb, .. } => verb,
        }
    }
}

/// Executes a parsed command and returns its output (possibly empty).
pub async fn execute(timer: &TimerHandle, command: &Command) -> Result<String, ControlError> {
    let verb = command.verb();
    let unavailable = |source| ControlError::Timer { verb, source };

    let op = match command {
        Command::Pause(value) => TimerOp::Pause(*value),
        Command::Seek(SeekTarget::Absolute(remaining)) => TimerOp::SeekTo(*remaining),
        Command::Seek(SeekTarget::Relative(delta)) => TimerOp::SeekAdd(*delta),
        Command::Reset => TimerOp::Reset,
        Command::Next => TimerOp::Next,
        Command::Prev => TimerOp::Prev,
        Command::Sessions(arg) => TimerOp::Sessions(*arg),
        Command::Init => TimerOp::Init,
        Command::Timer(field) => {
            let snapshot = timer.snapshot().await.map_err(unavailable)?;
            return match field {
                None => {
                    let mut out = String::new();
                    for (name, value) in snapshot.fields() {
                        let _ = writeln!(out, "{name}: {value}");
                    }
                    Ok(out)
                }
                Some(name) => snapshot
                    .field(name)
                    .map(|value| format!("{value}\n"))
                    .ok_or_else(|| CommandError::UnknownField(name.clone()).into()),
            };
        }
        Command::Commands => return Ok(commands_listing()),
    };

    timer.apply(op).await.map_err(unavailable)?;
    Ok(String::new())
}

/// Parses and executes one line, returning the framed reply (`OK` or `ACK`).
pub async fn respond(timer: &TimerHandle, line: &str) -> String {
    let result = match Command::parse(line) {
        Ok(command) => execute(timer, &command).await,
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(output) => reply::ok(&output),
        Err(e) => reply::ack(e.verb(), &e.to_string()),
    }
}
