//! Hook subscribers talking to the outside world.
//!
//! - [`ExecHook`] runs a configured program with the JSON snapshot as its
//!   first argument.
//! - [`FifoWriter`] writes one JSON line per event into a named pipe while a
//!   reader is attached, and removes the pipe on `quit`.
//!
//! Both log their failures and never report back to the engine.

use std::ffi::CString;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use pomo_core::{EventKind, TimerEvent, TimerSnapshot};

use crate::hooks::HookHandler;

fn snapshot_json(snapshot: &TimerSnapshot) -> Option<String> {
    match serde_json::to_string(snapshot) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(error = %e, "Failed to serialize snapshot");
            None
        }
    }
}

// ============================================================================
// Exec
// ============================================================================

/// Runs `program <snapshot-json>` for every event it is subscribed to.
pub struct ExecHook {
    program: String,
}

impl ExecHook {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Runs the program to completion for one event.
    pub async fn run(&self, event: &TimerEvent) -> io::Result<ExitStatus> {
        let payload = snapshot_json(event.snapshot()).unwrap_or_else(|| "{}".to_string());
        Command::new(&self.program)
            .arg(payload)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .await
    }
}

#[async_trait]
impl HookHandler for ExecHook {
    async fn handle(&self, event: TimerEvent) {
        // The child runs detached so a slow script does not hold up later events.
        let hook = ExecHook::new(self.program.clone());
        tokio::spawn(async move {
            match hook.run(&event).await {
                Ok(status) if status.success() => {
                    debug!(program = %hook.program, event = event.name(), "Exec hook finished");
                }
                Ok(status) => {
                    warn!(
                        program = %hook.program,
                        event = event.name(),
                        %status,
                        "Exec hook failed"
                    );
                }
                Err(e) => {
                    warn!(
                        program = %hook.program,
                        event = event.name(),
                        error = %e,
                        "Failed to run exec hook"
                    );
                }
            }
        });
    }
}

// ============================================================================
// FIFO
// ============================================================================

/// Writes snapshots into a named pipe.
#[derive(Debug, Clone)]
pub struct FifoWriter {
    path: PathBuf,
}

impl FifoWriter {
    /// Creates the pipe unless one already exists at `path`.
    ///
    /// Fails if something other than a FIFO is in the way.
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        match std::fs::metadata(&path) {
            Ok(meta) if meta.file_type().is_fifo() => {
                debug!(path = %path.display(), "Reusing existing FIFO");
            }
            Ok(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} exists and is not a FIFO", path.display()),
                ));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                mkfifo(&path)?;
                info!(path = %path.display(), "Created FIFO");
            }
            Err(e) => return Err(e),
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes one line if a reader is attached.
    ///
    /// Returns `Ok(false)` when nobody is reading.
    pub fn write_line(&self, line: &str) -> io::Result<bool> {
        let file = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.path);

        let mut file = match file {
            Ok(file) => file,
            Err(e) if e.raw_os_error() == Some(libc::ENXIO) => return Ok(false),
            Err(e) => return Err(e),
        };

        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        file.write_all(&buf)?;
        Ok(true)
    }

    /// [`write_line`](Self::write_line) with a serialized snapshot, on the
    /// blocking pool.
    pub async fn write_snapshot(&self, snapshot: &TimerSnapshot) {
        let Some(line) = snapshot_json(snapshot) else {
            return;
        };
        let writer = self.clone();
        let result = tokio::task::spawn_blocking(move || writer.write_line(&line)).await;
        match result {
            Ok(Ok(true)) => debug!(path = %self.path.display(), "Wrote to FIFO"),
            Ok(Ok(false)) => debug!(path = %self.path.display(), "No FIFO reader, skipped"),
            Ok(Err(e)) => warn!(path = %self.path.display(), error = %e, "Writing to FIFO failed"),
            Err(e) => warn!(error = %e, "FIFO write task failed"),
        }
    }

    /// Removes the pipe.
    pub fn remove(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed FIFO"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove FIFO"),
        }
    }
}

#[async_trait]
impl HookHandler for FifoWriter {
    async fn handle(&self, event: TimerEvent) {
        if event.kind() == EventKind::Quit {
            self.remove();
        } else {
            self.write_snapshot(event.snapshot()).await;
        }
    }
}

fn mkfifo(path: &Path) -> io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o644) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pomo_core::{TimerConfig, TimerState};
    use std::io::Read;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    fn snapshot() -> TimerSnapshot {
        TimerSnapshot::new(TimerState::default(), &TimerConfig::default())
    }

    #[test]
    fn test_create_makes_a_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pomo.fifo");
        FifoWriter::create(&path).unwrap();
        assert!(std::fs::metadata(&path).unwrap().file_type().is_fifo());

        // a second create reuses it
        FifoWriter::create(&path).unwrap();
    }

    #[test]
    fn test_create_refuses_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain");
        std::fs::write(&path, "x").unwrap();
        assert!(FifoWriter::create(&path).is_err());
    }

    #[test]
    fn test_write_without_reader_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let fifo = FifoWriter::create(dir.path().join("pomo.fifo")).unwrap();
        assert!(!fifo.write_line("{}").unwrap());
    }

    #[tokio::test]
    async fn test_reader_receives_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let fifo = FifoWriter::create(dir.path().join("pomo.fifo")).unwrap();

        let mut reader = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(fifo.path())
            .unwrap();

        fifo.handle(TimerEvent::Change(snapshot())).await;

        let mut buf = vec![0u8; 4096];
        let n = reader.read(&mut buf).unwrap();
        let line = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(line.ends_with('\n'));
        let decoded: TimerSnapshot = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(decoded, snapshot());
    }

    #[tokio::test]
    async fn test_quit_removes_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let fifo = FifoWriter::create(dir.path().join("pomo.fifo")).unwrap();
        fifo.handle(TimerEvent::Quit(snapshot())).await;
        assert!(!fifo.path().exists());
    }

    #[tokio::test]
    async fn test_exec_passes_snapshot_as_first_argument() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.json");
        let script = dir.path().join("hook.sh");
        std::fs::write(
            &script,
            format!("#!/bin/sh\nprintf '%s' \"$1\" > '{}'\n", out.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let hook = ExecHook::new(script.to_string_lossy());
        let status = hook.run(&TimerEvent::ModeStart(snapshot())).await.unwrap();
        assert!(status.success());

        let written = std::fs::read_to_string(&out).unwrap();
        let decoded: TimerSnapshot = serde_json::from_str(&written).unwrap();
        assert_eq!(decoded, snapshot());
    }

    #[tokio::test]
    async fn test_exec_missing_program_is_logged_not_fatal() {
        let hook = ExecHook::new("/nonexistent/pomo-hook");
        assert!(hook.run(&TimerEvent::Pause(snapshot())).await.is_err());

        // the handler swallows the failure
        hook.handle(TimerEvent::Pause(snapshot())).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
