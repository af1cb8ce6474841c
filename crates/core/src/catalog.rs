//! Snapshots of a single directory's children.
//!
//! An [`EntryCatalog`] is what every view renders: the immediate children of
//! one [`Location`], hidden entries filtered out unless requested, directories
//! first and both partitions in natural order.
//!
//! # Symlinks
//!
//! Classification never follows symlinks, which keeps listing free of cycles.
//! A link is reported as [`EntryKind::Symlink`] and sorted with the files even
//! when it points at a directory; entering it is still possible through
//! [`NavigationSession::enter`](crate::navigation::NavigationSession::enter),
//! which resolves the target at that moment.

use crate::error::Error;
use crate::location::Location;
use lazy_static::lazy_static;
use nix::unistd::{access as nix_access, AccessFlags};
use regex::Regex;
use std::cmp::Ordering;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use walkdir::WalkDir;

const HIDDEN_PREFIX: char = '.';
const BACKUP_SUFFIX: char = '~';

lazy_static! {
    static ref NATURAL_RUN: Regex = Regex::new(r"[0-9]+|[^0-9]+").unwrap();
}

/// How an entry was classified, from `lstat` data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Directory,
    File,
    Symlink,
    /// Sockets, fifos and device nodes.
    Other,
}

impl EntryKind {
    pub fn is_directory(self) -> bool {
        self == EntryKind::Directory
    }

    fn from_file_type(file_type: fs::FileType) -> EntryKind {
        if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        }
    }
}

/// One child of a catalogued directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub location: Location,
    pub kind: EntryKind,
    /// Size in bytes as reported by `lstat`, 0 if the entry vanished mid-scan.
    pub size: u64,
}

impl CatalogEntry {
    pub fn name(&self) -> std::borrow::Cow<'_, str> {
        self.location.name()
    }

    fn raw_name(&self) -> &OsStr {
        self.location.file_name().unwrap_or_default()
    }
}

/// Ordering applied by [`EntryCatalog::arranged`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Name,
    Size,
}

/// Immutable, ordered listing of one directory.
///
/// Equality only looks at the ordered sequence of locations: a reorder is a
/// change, while a file growing in place is not.
#[derive(Debug, Clone)]
pub struct EntryCatalog {
    target: Location,
    show_hidden: bool,
    entries: Vec<CatalogEntry>,
}

impl PartialEq for EntryCatalog {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(&other.entries)
                .all(|(a, b)| a.location == b.location)
    }
}

impl Eq for EntryCatalog {}

impl EntryCatalog {
    /// Lists the immediate children of `location`.
    ///
    /// Entries whose name starts with `.` or ends with `~` are left out unless
    /// `show_hidden` is set. Children that disappear or can't be stat'ed while
    /// the directory is being read are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReadable`] if `location` doesn't exist, isn't a
    /// directory, or can't be read.
    pub fn build(location: &Location, show_hidden: bool) -> Result<EntryCatalog, Error> {
        let metadata =
            fs::metadata(location).map_err(|e| Error::not_readable(location.as_path(), &e))?;
        if !metadata.is_dir() {
            let err = io::Error::new(io::ErrorKind::InvalidInput, "not a directory");
            return Err(Error::not_readable(location.as_path(), &err));
        }

        let mut directories = Vec::new();
        let mut files = Vec::new();

        let walker = WalkDir::new(location)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false);

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.depth() == 0 => return Err(walk_error(location, &err)),
                Err(err) => {
                    tracing::debug!(location = %location, error = %err, "skipping unreadable entry");
                    continue;
                }
            };

            let name = entry.file_name();
            if !show_hidden && is_hidden(name) {
                continue;
            }

            let kind = EntryKind::from_file_type(entry.file_type());
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let catalog_entry = CatalogEntry {
                location: location.join_name(name),
                kind,
                size,
            };

            if kind.is_directory() {
                directories.push(catalog_entry);
            } else {
                files.push(catalog_entry);
            }
        }

        directories.sort_by(compare_names);
        files.sort_by(compare_names);
        directories.append(&mut files);

        Ok(EntryCatalog {
            target: location.clone(),
            show_hidden,
            entries: directories,
        })
    }

    /// The directory this catalog was computed for.
    pub fn target(&self) -> &Location {
        &self.target
    }

    /// The hidden-file policy used to compute this catalog.
    pub fn show_hidden(&self) -> bool {
        self.show_hidden
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn locations(&self) -> impl Iterator<Item = &Location> {
        self.entries.iter().map(|entry| &entry.location)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn directory_count(&self) -> usize {
        self.entries
            .iter()
            .take_while(|entry| entry.kind.is_directory())
            .count()
    }

    /// Returns the entries in display order for a view.
    ///
    /// Directories always come before files. With [`SortOrder::Size`] files
    /// are ordered by size, ties broken by name, and directories keep their
    /// natural order since their `lstat` size says nothing useful. `reverse`
    /// flips each partition independently.
    pub fn arranged(&self, order: SortOrder, reverse: bool) -> Vec<&CatalogEntry> {
        let (directories, files) = self.entries.split_at(self.directory_count());
        let mut directories: Vec<&CatalogEntry> = directories.iter().collect();
        let mut files: Vec<&CatalogEntry> = files.iter().collect();

        if order == SortOrder::Size {
            files.sort_by(|a, b| {
                a.size
                    .cmp(&b.size)
                    .then_with(|| compare_names(a, b))
            });
        }

        if reverse {
            directories.reverse();
            files.reverse();
        }

        directories.append(&mut files);
        directories
    }
}

fn walk_error(location: &Location, err: &walkdir::Error) -> Error {
    match err.io_error() {
        Some(io_err) => Error::not_readable(location.as_path(), io_err),
        None => Error::NotReadable {
            path: location.as_path().to_path_buf(),
            kind: io::ErrorKind::Other,
            reason: err.to_string(),
        },
    }
}

/// Returns `true` for dotfiles and editor backups.
pub fn is_hidden(name: &OsStr) -> bool {
    let name = name.to_string_lossy();
    name.starts_with(HIDDEN_PREFIX) || name.ends_with(BACKUP_SUFFIX)
}

/// Compares two names the way people count: `file2` before `file10`.
///
/// Names are split into digit and non-digit runs. Text runs compare
/// case-insensitively, digit runs by numeric value whatever their length, and
/// a digit run sorts before a text run. Names that are still equal are
/// ordered by their raw bytes so the result is a total order.
///
/// # Example
///
/// ```
/// use wayfinder_core::catalog::natural_cmp;
///
/// let mut names = vec!["file10", "file2", "file1"];
/// names.sort_by(|a, b| natural_cmp(a, b));
/// assert_eq!(names, ["file1", "file2", "file10"]);
/// ```
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    natural_order(a, b).then_with(|| a.cmp(b))
}

/// Natural order of entry names. Names that are not valid UTF-8 are compared
/// through their lossy text, then by their raw bytes.
fn compare_names(a: &CatalogEntry, b: &CatalogEntry) -> Ordering {
    let (x, y) = (a.raw_name(), b.raw_name());
    natural_order(&x.to_string_lossy(), &y.to_string_lossy())
        .then_with(|| x.as_bytes().cmp(y.as_bytes()))
}

fn natural_order(a: &str, b: &str) -> Ordering {
    let mut left = NATURAL_RUN.find_iter(a).map(|m| m.as_str());
    let mut right = NATURAL_RUN.find_iter(b).map(|m| m.as_str());

    loop {
        let ordering = match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => compare_runs(x, y),
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }
}

fn compare_runs(x: &str, y: &str) -> Ordering {
    let x_digits = x.starts_with(|c: char| c.is_ascii_digit());
    let y_digits = y.starts_with(|c: char| c.is_ascii_digit());

    match (x_digits, y_digits) {
        (true, true) => {
            let x = x.trim_start_matches('0');
            let y = y.trim_start_matches('0');
            x.len().cmp(&y.len()).then_with(|| x.cmp(y))
        }
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => x
            .chars()
            .flat_map(char::to_lowercase)
            .cmp(y.chars().flat_map(char::to_lowercase)),
    }
}

/// Whether the current process may read and write a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub readable: bool,
    pub writable: bool,
}

pub fn access(location: &Location) -> Access {
    Access {
        readable: nix_access(location.as_path(), AccessFlags::R_OK).is_ok(),
        writable: nix_access(location.as_path(), AccessFlags::W_OK).is_ok(),
    }
}

/// One-line summary of a location for status bars.
///
/// Directories report how many children they hold (hidden ones included),
/// regular files their size. Returns `None` for anything unreadable or that
/// is neither.
pub fn describe(location: &Location) -> Option<String> {
    if !access(location).readable {
        return None;
    }

    let metadata = fs::metadata(location).ok()?;
    if metadata.is_dir() {
        let count = fs::read_dir(location).ok()?.count();
        Some(match count {
            0 => "Empty folder".to_string(),
            1 => "Contains 1 item".to_string(),
            n => format!("Contains {} items", n),
        })
    } else if metadata.is_file() {
        Some(format!("Size: {}", format_size(metadata.len())))
    } else {
        None
    }
}

/// Formats a byte count with the largest binary unit that keeps it >= 1.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024 && unit < UNITS.len() - 1 {
        value /= 1024;
        unit += 1;
    }

    format!("{}{}", value, UNITS[unit])
}
