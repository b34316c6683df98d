//! Daemon settings.
//!
//! Built-in defaults, then the TOML file, then command-line overrides:
//!
//! ```toml
//! tcp-address = "localhost:7800"   # "" disables the TCP daemon
//! http-address = "localhost:7900"  # "" disables the HTTP daemon
//! statefile = "/home/me/.local/state/pomod/state.json"
//! statefile-keep-updated = false
//! fifo = "/tmp/pomod.fifo"
//! exec-start = "/usr/local/bin/on-start"
//! exec-end = "/usr/local/bin/on-end"
//! exec-pause = "/usr/local/bin/on-pause"
//!
//! [timer]
//! sessions = 4
//! tick = "1s"
//!
//! [timer.durations]
//! work = "25m"
//! ```
//!
//! Settings are loaded whole and validated before a generation uses them;
//! a reload builds a fresh `AppSettings` rather than editing the live one.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use pomo_core::{DomainError, TimerConfig};

use crate::http::DEFAULT_HTTP_ADDRESS;
use crate::server::DEFAULT_TCP_ADDRESS;

/// Name of the settings file inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Everything one daemon generation is built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AppSettings {
    pub tcp_address: String,
    pub http_address: String,
    pub statefile: Option<PathBuf>,
    /// Also save on every change, not only at quit
    pub statefile_keep_updated: bool,
    pub fifo: Option<PathBuf>,
    pub exec_start: Option<String>,
    pub exec_end: Option<String>,
    pub exec_pause: Option<String>,
    pub timer: TimerConfig,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            tcp_address: DEFAULT_TCP_ADDRESS.to_string(),
            http_address: DEFAULT_HTTP_ADDRESS.to_string(),
            statefile: None,
            statefile_keep_updated: false,
            fifo: None,
            exec_start: None,
            exec_end: None,
            exec_pause: None,
            timer: TimerConfig::default(),
        }
    }
}

impl AppSettings {
    /// Parses a TOML document on top of the defaults.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// TCP listen address, or `None` when disabled.
    pub fn tcp_address(&self) -> Option<&str> {
        non_empty(&self.tcp_address)
    }

    /// HTTP listen address, or `None` when disabled.
    pub fn http_address(&self) -> Option<&str> {
        non_empty(&self.http_address)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        self.timer.validate()?;
        for (field, value) in [
            ("exec-start", &self.exec_start),
            ("exec-end", &self.exec_end),
            ("exec-pause", &self.exec_pause),
        ] {
            if matches!(value, Some(program) if program.trim().is_empty()) {
                return Err(DomainError::config(field, "must not be empty").into());
            }
        }
        Ok(())
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

/// Values given on the command line; `None` keeps the file's value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsOverrides {
    pub tcp_address: Option<String>,
    pub http_address: Option<String>,
    pub statefile: Option<PathBuf>,
    pub statefile_keep_updated: Option<bool>,
    pub fifo: Option<PathBuf>,
    pub exec_start: Option<String>,
    pub exec_end: Option<String>,
    pub exec_pause: Option<String>,
    pub sessions: Option<u32>,
    pub work: Option<Duration>,
    pub short_break: Option<Duration>,
    pub long_break: Option<Duration>,
    pub tick: Option<Duration>,
    pub paused: Option<bool>,
}

impl SettingsOverrides {
    pub fn apply(&self, settings: &mut AppSettings) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }
        fn set_opt<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                *target = value.clone();
            }
        }

        set(&mut settings.tcp_address, &self.tcp_address);
        set(&mut settings.http_address, &self.http_address);
        set_opt(&mut settings.statefile, &self.statefile);
        set(&mut settings.statefile_keep_updated, &self.statefile_keep_updated);
        set_opt(&mut settings.fifo, &self.fifo);
        set_opt(&mut settings.exec_start, &self.exec_start);
        set_opt(&mut settings.exec_end, &self.exec_end);
        set_opt(&mut settings.exec_pause, &self.exec_pause);

        let timer = &mut settings.timer;
        set(&mut timer.sessions_per_cycle, &self.sessions);
        set(&mut timer.durations.work, &self.work);
        set(&mut timer.durations.short_break, &self.short_break);
        set(&mut timer.durations.long_break, &self.long_break);
        set(&mut timer.tick_interval, &self.tick);
        set(&mut timer.initially_paused, &self.paused);
    }
}

/// Loads settings; called at startup and on every reload.
#[derive(Debug, Clone, Default)]
pub struct SettingsLoader {
    /// Explicit file; must exist when given
    path: Option<PathBuf>,
    overrides: SettingsOverrides,
}

impl SettingsLoader {
    pub fn new(path: Option<PathBuf>, overrides: SettingsOverrides) -> Self {
        Self { path, overrides }
    }

    /// `$XDG_CONFIG_HOME/pomod/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pomod").join(CONFIG_FILE_NAME))
    }

    /// The file `load` reads, if any.
    pub fn config_path(&self) -> Option<PathBuf> {
        match &self.path {
            Some(path) => Some(path.clone()),
            None => Self::default_path().filter(|path| path.exists()),
        }
    }

    /// Reads, merges and validates.
    pub fn load(&self) -> Result<AppSettings, SettingsError> {
        let mut settings = match &self.path {
            Some(path) => {
                if !path.exists() {
                    return Err(SettingsError::NotFound(path.clone()));
                }
                read_file(path)?
            }
            None => match Self::default_path() {
                Some(path) if path.exists() => read_file(&path)?,
                _ => {
                    debug!("No config file found, using defaults");
                    AppSettings::default()
                }
            },
        };

        self.overrides.apply(&mut settings);
        settings.validate()?;
        Ok(settings)
    }
}

fn read_file(path: &Path) -> Result<AppSettings, SettingsError> {
    let text = std::fs::read_to_string(path).map_err(|e| SettingsError::Io {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;
    let settings = AppSettings::from_toml(&text).map_err(|e| SettingsError::Parse {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;
    info!(path = %path.display(), "Loaded configuration");
    Ok(settings)
}

/// Errors loading settings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read {path}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Invalid config file {path}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error(transparent)]
    Invalid(#[from] DomainError),
}
