//! Normalized absolute filesystem paths.

use crate::error::Error;
use std::borrow::Cow;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};

/// An absolute filesystem path in normal form.
///
/// `.` and `..` components are resolved lexically, duplicate separators are
/// collapsed and there is no trailing separator except for the root itself.
/// Two locations are the same iff their normalized paths are equal, so a
/// `Location` can be used directly as a map key.
///
/// Normalization never touches the filesystem: symlinks are not resolved and
/// the path doesn't have to exist.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location(PathBuf);

impl Location {
    /// The filesystem root, `/`.
    pub fn root() -> Location {
        Location(PathBuf::from(MAIN_SEPARATOR.to_string()))
    }

    /// Normalizes `path` into a location.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTarget`] if `path` is relative.
    ///
    /// # Example
    ///
    /// ```
    /// use wayfinder_core::location::Location;
    ///
    /// let location = Location::new("/usr//share/./fonts/../icons/")?;
    /// assert_eq!(location.to_string(), "/usr/share/icons");
    /// assert_eq!(Location::new("/..")?, Location::root());
    /// # Ok::<(), wayfinder_core::Error>(())
    /// ```
    pub fn new(path: impl AsRef<Path>) -> Result<Location, Error> {
        let path = path.as_ref();
        if !path.has_root() {
            return Err(Error::invalid_target(path));
        }

        let mut normalized = PathBuf::from(MAIN_SEPARATOR.to_string());
        for component in path.components() {
            match component {
                Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir => {
                    normalized.pop();
                }
                Component::Normal(name) => normalized.push(name),
            }
        }

        Ok(Location(normalized))
    }

    /// Interprets text typed into a path bar.
    ///
    /// Absolute input is taken as is, `~` and `~/…` are expanded against
    /// `home` when one is known, and anything else is relative to `base`.
    pub fn resolve(input: &str, base: &Location, home: Option<&Location>) -> Result<Location, Error> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(base.clone());
        }

        if let Some(home) = home {
            if input == "~" {
                return Ok(home.clone());
            }
            if let Some(rest) = input.strip_prefix("~/") {
                return Location::new(home.0.join(rest));
            }
        }

        let path = Path::new(input);
        if path.has_root() {
            Location::new(path)
        } else {
            Location::new(base.0.join(path))
        }
    }

    /// Builds the location of a direct child named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] if `name` is empty, `.`, `..`, or
    /// contains a path separator.
    pub fn child(&self, name: &str) -> Result<Location, Error> {
        if name.is_empty() || name == "." || name == ".." || name.contains(MAIN_SEPARATOR) {
            return Err(Error::InvalidName(name.to_string()));
        }

        Ok(self.join_name(OsStr::new(name)))
    }

    /// Appends a name already known to be a single component, as read from a
    /// directory listing.
    pub(crate) fn join_name(&self, name: &OsStr) -> Location {
        Location(self.0.join(name))
    }

    /// Returns the parent directory. The parent of the root is the root.
    pub fn parent(&self) -> Location {
        self.0
            .parent()
            .map(|parent| Location(parent.to_path_buf()))
            .unwrap_or_else(|| self.clone())
    }

    pub fn is_root(&self) -> bool {
        self.0.parent().is_none()
    }

    /// Last path component, `None` for the root.
    pub fn file_name(&self) -> Option<&OsStr> {
        self.0.file_name()
    }

    /// Last path component as text, or `/` for the root.
    pub fn name(&self) -> Cow<'_, str> {
        match self.0.file_name() {
            Some(name) => name.to_string_lossy(),
            None => self.0.to_string_lossy(),
        }
    }

    /// Returns `true` if `self` is `ancestor` or lies below it.
    ///
    /// The comparison is component-wise, so `/media/usb2` is not within `/media/usb`.
    pub fn is_within(&self, ancestor: &Location) -> bool {
        self.0.starts_with(&ancestor.0)
    }

    /// Components below the root, outermost first.
    pub fn segments(&self) -> impl Iterator<Item = &OsStr> {
        self.0.components().filter_map(|component| match component {
            Component::Normal(name) => Some(name),
            _ => None,
        })
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for Location {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}
