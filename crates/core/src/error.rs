//! Error taxonomy shared by the catalog, watcher and navigation layers.
//!
//! Listing failures are absorbed by the watcher and turned into
//! [`WatchEvent::PollFailed`](crate::watcher::WatchEvent::PollFailed) events.
//! Navigation failures are returned synchronously to the caller and never
//! mutate the session that reported them.

use std::io;
use std::path::PathBuf;

/// Coarse classification of an [`Error`], exposed for UI layers that only
/// need to pick a message template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A directory could not be listed (permission denied, vanished, not a directory).
    NotReadable,
    /// Navigation to a path that is not a readable directory.
    InvalidTarget,
    /// A name that can't be used as a single path component.
    InvalidName,
}

/// Errors produced by the directory engine.
///
/// The type is `Clone` so it can travel inside watcher events to any number of
/// subscribers, which is why I/O errors are flattened to their kind and message.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Listing `path` failed.
    #[error("can't list {}: {reason}", path.display())]
    NotReadable {
        path: PathBuf,
        kind: io::ErrorKind,
        reason: String,
    },

    /// `path` can't be navigated to.
    #[error("{} is not a readable directory", path.display())]
    InvalidTarget { path: PathBuf },

    /// `name` is empty, a relative marker, or contains a separator.
    #[error("invalid entry name {0:?}")]
    InvalidName(String),
}

impl Error {
    /// Builds a [`Error::NotReadable`] from an I/O error raised while listing `path`.
    pub fn not_readable(path: impl Into<PathBuf>, err: &io::Error) -> Self {
        Error::NotReadable {
            path: path.into(),
            kind: err.kind(),
            reason: err.to_string(),
        }
    }

    pub fn invalid_target(path: impl Into<PathBuf>) -> Self {
        Error::InvalidTarget { path: path.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotReadable { .. } => ErrorKind::NotReadable,
            Error::InvalidTarget { .. } => ErrorKind::InvalidTarget,
            Error::InvalidName(_) => ErrorKind::InvalidName,
        }
    }
}
