//! Timer events.
//!
//! Every engine hook has a name and carries the snapshot taken when it
//! fired. `Set` is special: if anything subscribes to it, the natural hook
//! of the mutation (`Change`, `Pause`, `ModeStart`) is suppressed.

use std::fmt;

use crate::snapshot::TimerSnapshot;

/// The engine hooks, without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Init,
    Change,
    ModeStart,
    ModeEnd,
    Pause,
    Quit,
    Set,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        Self::Init,
        Self::Change,
        Self::ModeStart,
        Self::ModeEnd,
        Self::Pause,
        Self::Quit,
        Self::Set,
    ];

    /// Returns the hook name (also used as the SSE event name).
    pub fn name(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Change => "change",
            Self::ModeStart => "mode-start",
            Self::ModeEnd => "mode-end",
            Self::Pause => "pause",
            Self::Quit => "quit",
            Self::Set => "set",
        }
    }

    /// Looks a hook up by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fired hook with its snapshot payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    Init(TimerSnapshot),
    Change(TimerSnapshot),
    ModeStart(TimerSnapshot),
    ModeEnd(TimerSnapshot),
    Pause(TimerSnapshot),
    Quit(TimerSnapshot),
    Set(TimerSnapshot),
}

impl TimerEvent {
    pub fn new(kind: EventKind, snapshot: TimerSnapshot) -> Self {
        match kind {
            EventKind::Init => Self::Init(snapshot),
            EventKind::Change => Self::Change(snapshot),
            EventKind::ModeStart => Self::ModeStart(snapshot),
            EventKind::ModeEnd => Self::ModeEnd(snapshot),
            EventKind::Pause => Self::Pause(snapshot),
            EventKind::Quit => Self::Quit(snapshot),
            EventKind::Set => Self::Set(snapshot),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Init(_) => EventKind::Init,
            Self::Change(_) => EventKind::Change,
            Self::ModeStart(_) => EventKind::ModeStart,
            Self::ModeEnd(_) => EventKind::ModeEnd,
            Self::Pause(_) => EventKind::Pause,
            Self::Quit(_) => EventKind::Quit,
            Self::Set(_) => EventKind::Set,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    pub fn snapshot(&self) -> &TimerSnapshot {
        match self {
            Self::Init(s)
            | Self::Change(s)
            | Self::ModeStart(s)
            | Self::ModeEnd(s)
            | Self::Pause(s)
            | Self::Quit(s)
            | Self::Set(s) => s,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimerConfig;
    use crate::state::TimerState;

    #[test]
    fn test_kind_names_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(EventKind::from_name("restart"), None);
    }

    #[test]
    fn test_event_keeps_kind_and_payload() {
        let snapshot = TimerSnapshot::new(TimerState::default(), &TimerConfig::default());
        let event = TimerEvent::new(EventKind::ModeEnd, snapshot);
        assert_eq!(event.kind(), EventKind::ModeEnd);
        assert_eq!(event.name(), "mode-end");
        assert_eq!(event.snapshot(), &snapshot);
    }
}
