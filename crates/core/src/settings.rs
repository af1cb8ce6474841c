//! User configuration.
//!
//! Settings are read from a single TOML file. Every field has a default, so a
//! partial file (or no file at all) is valid:
//!
//! ```toml
//! [watcher]
//! poll-interval-ms = 500
//! show-hidden = false
//! poll-timeout-ms = 0
//!
//! [navigation]
//! history-limit = 64
//!
//! [logging]
//! enabled = true
//! level = "info"
//! max-files = 3
//! directory = "logs"
//! ```

use crate::helpers::{load_toml, save_toml};
use anyhow::Error;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const SETTINGS_FILE: &str = "wayfinder.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Settings {
    pub watcher: WatcherSettings,
    pub navigation: NavigationSettings,
    pub logging: LoggingSettings,
}

/// Directory polling behaviour, shared by every view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct WatcherSettings {
    pub poll_interval_ms: u64,
    /// Initial hidden-file policy for new views.
    pub show_hidden: bool,
    /// Upper bound for a single listing, useful on network filesystems.
    /// `0` disables the bound.
    pub poll_timeout_ms: u64,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        WatcherSettings {
            poll_interval_ms: 500,
            show_hidden: false,
            poll_timeout_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct NavigationSettings {
    /// Maximum number of entries kept in each history stack, `0` for no limit.
    pub history_limit: usize,
}

impl Default for NavigationSettings {
    fn default() -> Self {
        NavigationSettings { history_limit: 64 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LoggingSettings {
    pub enabled: bool,
    /// Default filter directive, overridden by `RUST_LOG`.
    pub level: String,
    /// Number of run logs to keep, `0` keeps all of them.
    pub max_files: usize,
    /// Log directory. Relative paths are resolved against the working
    /// directory.
    pub directory: PathBuf,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        LoggingSettings {
            enabled: true,
            level: "info".to_string(),
            max_files: 3,
            directory: PathBuf::from("logs"),
        }
    }
}

impl Settings {
    /// Loads settings from `path`, falling back to defaults if the file doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but can't be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Settings, Error> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Settings::default());
        }

        load_toml(path)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        save_toml(self, path)
    }
}
