//! TCP reply framing.
//!
//! - greeting: `OK pomod <version>\n`
//! - success:  `<output>OK\n` (output is empty or newline-terminated lines)
//! - failure:  `ACK {<verb>} <message>\n`

/// Server name announced in the greeting.
pub const SERVER_NAME: &str = "pomod";

/// Protocol version announced in the greeting.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The line sent when a connection is accepted.
pub fn greeting() -> String {
    format!("OK {SERVER_NAME} {VERSION}\n")
}

/// Success reply wrapping `output`.
pub fn ok(output: &str) -> String {
    if output.is_empty() || output.ends_with('\n') {
        format!("{output}OK\n")
    } else {
        format!("{output}\nOK\n")
    }
}

/// Failure reply for `verb`.
pub fn ack(verb: &str, message: &str) -> String {
    format!("ACK {{{verb}}} {message}\n")
}

/// A failure reply split back into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub verb: String,
    pub message: String,
}

impl Ack {
    /// Parses an `ACK {verb} message` line; `None` for anything else.
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.trim_end_matches(['\r', '\n']).strip_prefix("ACK {")?;
        let (verb, message) = rest.split_once("} ")?;
        Some(Self {
            verb: verb.to_string(),
            message: message.to_string(),
        })
    }
}
