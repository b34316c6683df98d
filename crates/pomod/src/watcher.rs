//! Reload on configuration file changes.
//!
//! The directory holding the file is watched rather than the file itself:
//! editors commonly save by writing a new file and renaming it over the
//! old one, which would orphan a watch on the original inode.
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌────────────────────┐
//! │   notify    │────>│  debouncer  │────>│ LifecycleSignal::  │
//! │ (parent dir)│     │  (250ms)    │     │ Reload → Supervisor│
//! └─────────────┘     └─────────────┘     └────────────────────┘
//! ```

use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::lifecycle::LifecycleSignal;

/// Window in which bursts of writes collapse into one reload.
pub const DEBOUNCE: Duration = Duration::from_millis(250);

/// Errors starting a watch.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("Config path {0} has no file name")]
    NoFileName(String),

    #[error("Failed to watch {path}: {error}")]
    Notify { path: String, error: notify::Error },
}

/// Sends [`LifecycleSignal::Reload`] whenever the config file changes.
/// Dropping it ends the watch.
pub struct ConfigWatcher {
    _debouncer: Debouncer<RecommendedWatcher>,
}

impl ConfigWatcher {
    pub fn spawn(
        path: &Path,
        signals: mpsc::Sender<LifecycleSignal>,
    ) -> Result<Self, WatchError> {
        let file_name: OsString = path
            .file_name()
            .ok_or_else(|| WatchError::NoFileName(path.display().to_string()))?
            .to_owned();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let notify_err = |error: notify::Error| WatchError::Notify {
            path: dir.display().to_string(),
            error,
        };

        let mut debouncer = new_debouncer(DEBOUNCE, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let touched = events
                        .iter()
                        .any(|event| event.path.file_name() == Some(file_name.as_os_str()));
                    if touched {
                        request_reload(&signals);
                    }
                }
                Err(e) => warn!(error = %e, "Config watch error"),
            }
        })
        .map_err(notify_err)?;

        debouncer
            .watcher()
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(notify_err)?;

        info!(path = %path.display(), "Watching configuration file");
        Ok(Self {
            _debouncer: debouncer,
        })
    }
}

fn request_reload(signals: &mpsc::Sender<LifecycleSignal>) {
    match signals.try_send(LifecycleSignal::Reload) {
        Ok(()) => info!("Configuration file changed, reloading"),
        Err(TrySendError::Full(_)) => debug!("Reload already pending"),
        Err(TrySendError::Closed(_)) => debug!("Supervisor gone, ignoring config change"),
    }
}
