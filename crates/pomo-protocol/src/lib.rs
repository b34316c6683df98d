//! pomo protocol - wire formats for the pomodoro daemon
//!
//! This crate provides the formats clients use to talk to pomod:
//! - `command` - the line-oriented control grammar shared by TCP and HTTP
//! - `reply` - TCP greeting / OK / ACK framing
//! - `update` - HTTP JSON request bodies
//! - `sse` - server-push event names and an incremental decoder

pub mod command;
pub mod reply;
pub mod sse;
pub mod update;

pub use command::{
    commands_listing, Command, CommandError, SeekTarget, SessionsArg, VerbSpec, VERBS,
};
pub use reply::{Ack, SERVER_NAME, VERSION};
pub use sse::{SseDecodeError, SseDecoder, SseFrame, BROADCAST_EVENTS, EVENT_RESTART, EVENT_TIMER};
pub use update::{PauseRequest, TimerUpdate};
