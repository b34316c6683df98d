//! Server-sent event names and an incremental frame decoder.
//!
//! The daemon pushes one named event per engine hook. A satellite client
//! reads the raw byte stream and feeds it to [`SseDecoder`], which yields
//! complete frames as they arrive, regardless of how the transport split
//! the bytes.

use pomo_core::{EventKind, TimerSnapshot};
use thiserror::Error;

/// Synthetic snapshot sent once when a subscriber connects.
pub const EVENT_TIMER: &str = "timer";

/// Sent to every subscriber right before the daemon goes away for a reload.
pub const EVENT_RESTART: &str = "restart";

/// Hooks that are broadcast to stream subscribers.
pub const BROADCAST_EVENTS: [EventKind; 5] = [
    EventKind::Init,
    EventKind::Change,
    EventKind::ModeStart,
    EventKind::ModeEnd,
    EventKind::Pause,
];

/// Longest line the decoder buffers before giving up.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Errors produced by [`SseDecoder`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SseDecodeError {
    #[error("event stream line is not valid UTF-8")]
    InvalidUtf8,

    #[error("event stream line exceeds {0} bytes")]
    LineTooLong(usize),
}

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Event name; `message` when the frame had no `event:` field
    pub event: String,
    pub data: String,
}

impl SseFrame {
    /// Returns the engine hook this frame mirrors, if any.
    pub fn kind(&self) -> Option<EventKind> {
        EventKind::from_name(&self.event)
    }

    pub fn is_restart(&self) -> bool {
        self.event == EVENT_RESTART
    }

    /// Parses the payload as a snapshot.
    pub fn snapshot(&self) -> Result<TimerSnapshot, serde_json::Error> {
        serde_json::from_str(&self.data)
    }
}

/// Incremental `text/event-stream` parser.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk of bytes and returns every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>, SseDecodeError> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8(line).map_err(|_| SseDecodeError::InvalidUtf8)?;
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }

        if self.buffer.len() > MAX_LINE_LENGTH {
            self.buffer.clear();
            return Err(SseDecodeError::LineTooLong(MAX_LINE_LENGTH));
        }
        Ok(frames)
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // id and retry carry nothing the daemon uses
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() && event.is_none() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}
