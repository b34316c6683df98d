//! Timer state file.
//!
//! The file holds the last saved `TimerState` in a small JSON envelope:
//!
//! ```json
//! { "saved_at": "2026-10-17T09:00:00Z",
//!   "state": { "mode": "work", "remaining_ms": 1500000,
//!              "completed_sessions": 0, "paused": false } }
//! ```
//!
//! Writes go to a temporary file in the same directory which is then renamed
//! over the target, so a crash mid-write leaves the previous file intact.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use pomo_core::{TimerEvent, TimerState};

use crate::hooks::HookHandler;

/// On-disk envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub saved_at: DateTime<Utc>,
    pub state: TimerState,
}

/// Reads and writes the state file.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the saved state; `None` when no file exists yet.
    pub fn load(&self) -> Result<Option<TimerState>, PersistenceError> {
        let json = match std::fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };

        let persisted: PersistedState =
            serde_json::from_str(&json).map_err(|e| PersistenceError::Parse {
                path: self.path.clone(),
                error: e.to_string(),
            })?;

        debug!(
            path = %self.path.display(),
            saved_at = %persisted.saved_at,
            "Loaded timer state"
        );
        Ok(Some(persisted.state))
    }

    /// Atomically replaces the file with `state`.
    pub fn save(&self, state: &TimerState) -> Result<(), PersistenceError> {
        let persisted = PersistedState {
            saved_at: Utc::now(),
            state: *state,
        };
        let json = serde_json::to_vec_pretty(&persisted)
            .map_err(|e| PersistenceError::Serialize(e.to_string()))?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| self.io_error(e))?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| self.io_error(e))?;
        tmp.write_all(&json).map_err(|e| self.io_error(e))?;
        tmp.as_file().sync_all().map_err(|e| self.io_error(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_error(e.error))?;

        Ok(())
    }

    /// [`save`](Self::save) on the blocking pool.
    pub async fn save_async(&self, state: TimerState) -> Result<(), PersistenceError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.save(&state))
            .await
            .map_err(|e| PersistenceError::Io {
                path: self.path.clone(),
                error: e.to_string(),
            })?
    }

    fn io_error(&self, error: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            error: error.to_string(),
        }
    }
}

/// Hook subscriber writing every event's state to the store.
///
/// Failures are logged; the timer keeps running without persistence.
pub struct StateWriter {
    store: Arc<StateStore>,
}

impl StateWriter {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HookHandler for StateWriter {
    async fn handle(&self, event: TimerEvent) {
        match self.store.save_async(event.snapshot().state).await {
            Ok(()) => debug!(event = event.name(), "Saved timer state"),
            Err(e) => warn!(event = event.name(), error = %e, "Failed to save timer state"),
        }
    }
}

/// Errors reading or writing the state file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersistenceError {
    #[error("State file I/O error at {path}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Corrupt state file at {path}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Failed to serialize state: {0}")]
    Serialize(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use pomo_core::{TimerConfig, TimerMode, TimerSnapshot};

    fn state() -> TimerState {
        TimerState {
            mode: TimerMode::ShortBreak,
            remaining: TimeDelta::milliseconds(12_345),
            completed_sessions: 2,
            paused: true,
        }
    }

    #[test]
    fn test_missing_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("nested/state.json"));
        store.save(&state()).unwrap();
        assert_eq!(store.load().unwrap(), Some(state()));

        // overwrite keeps a single, valid file
        let mut next = state();
        next.paused = false;
        store.save(&next).unwrap();
        assert_eq!(store.load().unwrap(), Some(next));
        let entries = std::fs::read_dir(dir.path().join("nested")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = StateStore::new(&path);
        assert!(matches!(store.load(), Err(PersistenceError::Parse { .. })));
    }

    #[test]
    fn test_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        StateStore::new(&path).save(&state()).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(value["saved_at"].is_string());
        assert_eq!(value["state"]["mode"], "short-break");
        assert_eq!(value["state"]["remaining_ms"], 12_345);
    }

    #[tokio::test]
    async fn test_writer_hook_saves_event_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::new(dir.path().join("state.json")));
        let writer = StateWriter::new(Arc::clone(&store));

        let snapshot = TimerSnapshot::new(state(), &TimerConfig::default());
        writer.handle(TimerEvent::Quit(snapshot)).await;
        assert_eq!(store.load().unwrap(), Some(state()));
    }

    #[tokio::test]
    async fn test_writer_survives_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        // parent is a regular file, so every save fails
        let store = Arc::new(StateStore::new(blocker.join("state.json")));
        let writer = StateWriter::new(Arc::clone(&store));

        let snapshot = TimerSnapshot::new(state(), &TimerConfig::default());
        writer.handle(TimerEvent::Change(snapshot)).await;
        assert!(store.save(&state()).is_err());
    }
}
