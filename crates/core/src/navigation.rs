//! Per-view navigation state.
//!
//! A [`NavigationSession`] tracks where one view is and how it got there. It
//! never touches the watcher itself: the caller (see
//! [`FolderView`](crate::view::FolderView)) retargets the watcher whenever an
//! operation reports [`Navigation::Moved`].
//!
//! Every operation validates its destination. A failed validation returns
//! [`Error::InvalidTarget`] and leaves the session exactly as it was; a
//! location that stops being valid after it was entered stays in the history.

use crate::error::Error;
use crate::location::Location;
use crate::registry::NameRegistry;
use nix::unistd::{access, AccessFlags};
use std::fs;

/// Result of a navigation request that didn't fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    /// The session now points at this location.
    Moved(Location),
    /// The destination is the current location; history is untouched.
    Stayed,
    /// There is nowhere to go (empty history stack).
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct NavigationSession {
    current: Location,
    back: Vec<Location>,
    forward: Vec<Location>,
    history_limit: usize,
}

impl NavigationSession {
    /// Opens a session at `start`.
    ///
    /// `history_limit` bounds each history stack; `0` means unbounded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTarget`] if `start` isn't a readable directory.
    pub fn open(
        start: Location,
        registry: &NameRegistry,
        history_limit: usize,
    ) -> Result<NavigationSession, Error> {
        check_target(&start, registry)?;
        Ok(NavigationSession {
            current: start,
            back: Vec::new(),
            forward: Vec::new(),
            history_limit,
        })
    }

    pub fn current(&self) -> &Location {
        &self.current
    }

    /// Previously visited locations, most recent last.
    pub fn back_history(&self) -> &[Location] {
        &self.back
    }

    /// Locations left by going back, the next one to revisit last.
    pub fn forward_history(&self) -> &[Location] {
        &self.forward
    }

    pub fn can_go_back(&self) -> bool {
        !self.back.is_empty()
    }

    pub fn can_go_forward(&self) -> bool {
        !self.forward.is_empty()
    }

    pub fn can_go_up(&self) -> bool {
        !self.current.is_root()
    }

    /// Moves to `location`, recording the current one in the back history and
    /// discarding the forward history.
    pub fn enter(&mut self, location: Location, registry: &NameRegistry) -> Result<Navigation, Error> {
        check_target(&location, registry)?;

        if location == self.current {
            return Ok(Navigation::Stayed);
        }

        tracing::debug!(from = %self.current, to = %location, "enter");
        let previous = std::mem::replace(&mut self.current, location.clone());
        push_bounded(&mut self.back, previous, self.history_limit);
        self.forward.clear();

        Ok(Navigation::Moved(location))
    }

    /// Enters the parent directory. Stays put at the root.
    pub fn go_up(&mut self, registry: &NameRegistry) -> Result<Navigation, Error> {
        let parent = self.current.parent();
        self.enter(parent, registry)
    }

    pub fn go_back(&mut self, registry: &NameRegistry) -> Result<Navigation, Error> {
        let Some(destination) = self.back.last() else {
            return Ok(Navigation::Unavailable);
        };
        check_target(destination, registry)?;

        if let Some(destination) = self.back.pop() {
            let previous = std::mem::replace(&mut self.current, destination);
            push_bounded(&mut self.forward, previous, self.history_limit);
        }

        Ok(Navigation::Moved(self.current.clone()))
    }

    pub fn go_forward(&mut self, registry: &NameRegistry) -> Result<Navigation, Error> {
        let Some(destination) = self.forward.last() else {
            return Ok(Navigation::Unavailable);
        };
        check_target(destination, registry)?;

        if let Some(destination) = self.forward.pop() {
            let previous = std::mem::replace(&mut self.current, destination);
            push_bounded(&mut self.back, previous, self.history_limit);
        }

        Ok(Navigation::Moved(self.current.clone()))
    }

    /// Checks that the current location is still usable.
    ///
    /// Fails with [`Error::InvalidTarget`] once the directory vanished or its
    /// mount was removed. The session is not moved; the caller decides where
    /// to go next.
    pub fn reload(&self, registry: &NameRegistry) -> Result<(), Error> {
        check_target(&self.current, registry)
    }
}

fn push_bounded(stack: &mut Vec<Location>, location: Location, limit: usize) {
    stack.push(location);
    if limit > 0 && stack.len() > limit {
        let excess = stack.len() - limit;
        stack.drain(..excess);
    }
}

/// Validates a navigation destination: it must be a directory the process
/// can list, not below a removed mount. Symlinks are followed here.
pub fn check_target(location: &Location, registry: &NameRegistry) -> Result<(), Error> {
    if registry.is_revoked(location) {
        return Err(Error::invalid_target(location.as_path()));
    }

    let is_dir = fs::metadata(location).map_or(false, |metadata| metadata.is_dir());
    if !is_dir || access(location.as_path(), AccessFlags::R_OK | AccessFlags::X_OK).is_err() {
        return Err(Error::invalid_target(location.as_path()));
    }

    Ok(())
}

/// One clickable segment of a path bar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crumb {
    pub label: String,
    pub location: Location,
}

/// Splits `location` into path-bar segments.
///
/// Locations inside the home directory start with a single home crumb instead
/// of `/`, `home`, `<user>`. Labels come from the registry, so special folders
/// and mounts show their display names.
pub fn breadcrumbs(location: &Location, registry: &NameRegistry) -> Vec<Crumb> {
    let anchor = registry
        .home()
        .filter(|home| !home.is_root() && location.is_within(home))
        .cloned()
        .unwrap_or_else(Location::root);

    let mut crumbs = vec![Crumb {
        label: registry.display_name(&anchor),
        location: anchor.clone(),
    }];

    let skip = anchor.segments().count();
    let mut current = anchor;
    for segment in location.segments().skip(skip) {
        current = current.join_name(segment);
        crumbs.push(Crumb {
            label: registry.display_name(&current),
            location: current.clone(),
        });
    }

    crumbs
}
