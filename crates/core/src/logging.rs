//! Structured JSON logging for Wayfinder runs.
//!
//! Every run writes one file, `wayfinder-<run_id>.json`, into the configured
//! log directory. The run ID is a UUID v7, so the ID embedded in a file name
//! tells which run is older; pruning relies on that rather than on
//! modification times.
//!
//! # Configuration
//!
//! ```toml
//! [logging]
//! enabled = true
//! level = "info"      # a bare level applies to Wayfinder's own crates
//! max-files = 3       # run logs kept, this run included; 0 keeps all
//! directory = "logs"  # relative to the working directory, or absolute
//! ```
//!
//! A bare level such as `debug` turns up Wayfinder's own crates and leaves
//! dependencies at `warn`. Any other value is used as a full filter
//! directive. `RUST_LOG` overrides both:
//!
//! ```bash
//! RUST_LOG=wayfinder_core::watcher=trace,info wayfinder ~/Downloads
//! ```
//!
//! # Example
//!
//! ```no_run
//! use wayfinder_core::logging::{init_logging, shutdown_logging};
//! use wayfinder_core::settings::Settings;
//!
//! init_logging(&Settings::default())?;
//! tracing::info!("browser started");
//! shutdown_logging();
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::settings::{LoggingSettings, Settings};
use anyhow::{Context, Error};
use std::cmp;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{mpsc, Mutex, OnceLock};
use std::thread;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use walkdir::WalkDir;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const LOG_FILE_PREFIX: &str = "wayfinder-";
const LOG_FILE_EXTENSION: &str = "json";
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);
const OWN_CRATES: [&str; 2] = ["wayfinder_core", "wayfinder"];

static LOG_GUARD: OnceLock<Mutex<Option<WorkerGuard>>> = OnceLock::new();
static RUN_ID: OnceLock<Uuid> = OnceLock::new();

/// Returns the run ID of this process, generated on first access.
pub fn get_run_id() -> Uuid {
    *RUN_ID.get_or_init(Uuid::now_v7)
}

/// The directory run logs go to and how many of them survive a new run.
#[derive(Debug)]
struct LogDirectory {
    path: PathBuf,
    max_files: usize,
}

impl LogDirectory {
    fn resolve(settings: &LoggingSettings, base: &Path) -> LogDirectory {
        LogDirectory {
            path: base.join(&settings.directory),
            max_files: settings.max_files,
        }
    }

    fn file_prefix(run_id: Uuid) -> String {
        format!("{}{}", LOG_FILE_PREFIX, run_id)
    }

    /// Earlier run logs, oldest first.
    fn run_logs(&self) -> Result<Vec<(Uuid, PathBuf)>, Error> {
        let mut logs = Vec::new();
        for entry in WalkDir::new(&self.path).min_depth(1).max_depth(1) {
            let entry = entry
                .with_context(|| format!("can't read log directory {}", self.path.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(run_id) = parse_run_id(entry.file_name()) {
                logs.push((run_id, entry.into_path()));
            }
        }

        logs.sort_by_key(|(run_id, _)| *run_id);
        Ok(logs)
    }

    /// Deletes the oldest run logs so that, once this run's file exists, at
    /// most `max_files` remain. Returns the deleted paths.
    fn prune(&self) -> Result<Vec<PathBuf>, Error> {
        if self.max_files == 0 {
            return Ok(Vec::new());
        }

        let logs = self.run_logs()?;
        let excess = (logs.len() + 1).saturating_sub(self.max_files);
        let mut removed = Vec::with_capacity(excess);
        for (_, path) in logs.into_iter().take(excess) {
            fs::remove_file(&path)
                .with_context(|| format!("can't remove old log file {}", path.display()))?;
            removed.push(path);
        }

        Ok(removed)
    }
}

/// Extracts the run ID from a `wayfinder-<uuid>.json` file name.
fn parse_run_id(file_name: &OsStr) -> Option<Uuid> {
    let stem = file_name
        .to_str()?
        .strip_prefix(LOG_FILE_PREFIX)?
        .strip_suffix(LOG_FILE_EXTENSION)?
        .strip_suffix('.')?;
    Uuid::parse_str(stem).ok()
}

/// Installs the global tracing subscriber and records the run's settings.
///
/// Does nothing when logging is disabled. Call once, early in `main`.
///
/// # Errors
///
/// Returns an error if the log directory can't be prepared, the level
/// directive is invalid, or a global subscriber is already installed.
pub fn init_logging(settings: &Settings) -> Result<(), Error> {
    let logging = &settings.logging;
    if !logging.enabled {
        return Ok(());
    }

    let cwd = std::env::current_dir().context("can't get current working directory")?;
    let directory = LogDirectory::resolve(logging, &cwd);
    fs::create_dir_all(&directory.path)
        .with_context(|| format!("can't create log directory {}", directory.path.display()))?;
    let pruned = directory.prune()?;

    let appender = tracing_appender::rolling::Builder::new()
        .rotation(tracing_appender::rolling::Rotation::NEVER)
        .filename_prefix(LogDirectory::file_prefix(get_run_id()))
        .filename_suffix(LOG_FILE_EXTENSION)
        .build(&directory.path)
        .context("can't open the run log file")?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(build_filter(&logging.level)?)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .with_thread_names(true)
                .with_current_span(true),
        )
        .try_init()
        .context("can't initialize tracing subscriber")?;

    if let Ok(mut slot) = LOG_GUARD.get_or_init(|| Mutex::new(None)).lock() {
        *slot = Some(guard);
    }

    tracing::info!(
        run_id = %get_run_id(),
        version = VERSION,
        directory = %directory.path.display(),
        pruned = pruned.len(),
        "logging initialized"
    );
    tracing::info!(
        poll_interval_ms = settings.watcher.poll_interval_ms,
        poll_timeout_ms = settings.watcher.poll_timeout_ms,
        show_hidden = settings.watcher.show_hidden,
        history_limit = settings.navigation.history_limit,
        "settings loaded"
    );

    Ok(())
}

/// Flushes buffered log lines, waiting at most five seconds.
pub fn shutdown_logging() {
    let guard = LOG_GUARD
        .get()
        .and_then(|slot| slot.lock().ok())
        .and_then(|mut slot| slot.take());
    let Some(guard) = guard else {
        return;
    };

    tracing::info!(run_id = %get_run_id(), "logging shut down");

    let (flushed, done) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("log-flush".to_string())
        .spawn(move || {
            drop(guard);
            flushed.send(()).ok();
        });
    if spawned.is_ok() {
        done.recv_timeout(FLUSH_TIMEOUT).ok();
    }
}

fn build_filter(level: &str) -> Result<EnvFilter, Error> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    EnvFilter::builder()
        .parse(directives(level))
        .context("invalid logging level")
}

/// Expands the configured level into filter directives. An empty level
/// means `info`.
fn directives(level: &str) -> String {
    let level = level.trim();
    let level = if level.is_empty() { "info" } else { level };

    let Ok(own) = LevelFilter::from_str(level) else {
        return level.to_string();
    };
    let others = cmp::min(own, LevelFilter::WARN);
    let own = own.to_string().to_ascii_lowercase();

    let mut directives = vec![others.to_string().to_ascii_lowercase()];
    directives.extend(OWN_CRATES.iter().map(|name| format!("{}={}", name, own)));
    directives.join(",")
}
