//! Views and tabs.
//!
//! A [`FolderView`] pairs one [`NavigationSession`] with one
//! [`DirectoryWatcher`]: successful navigation retargets the watcher, and the
//! rendering layer consumes the watcher's events. Views share nothing but the
//! [`NameRegistry`] passed into each call, so tabs are fully independent.

use crate::error::Error;
use crate::location::Location;
use crate::navigation::{Navigation, NavigationSession};
use crate::registry::NameRegistry;
use crate::settings::Settings;
use crate::watcher::{DirectoryWatcher, TargetId, WatchEvent, WatchOptions};
use std::sync::mpsc::Receiver;

pub struct FolderView {
    session: NavigationSession,
    watcher: DirectoryWatcher,
    show_hidden: bool,
}

impl FolderView {
    /// Opens a view on `start` and starts watching it.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidTarget`] (reachable through
    /// `anyhow::Error::downcast_ref`) if `start` isn't a readable directory,
    /// or if the watcher thread can't be started.
    pub fn open(
        start: Location,
        registry: &NameRegistry,
        settings: &Settings,
    ) -> Result<FolderView, anyhow::Error> {
        let session = NavigationSession::open(start, registry, settings.navigation.history_limit)?;
        let options = WatchOptions::from(&settings.watcher);
        let watcher = DirectoryWatcher::spawn(session.current().clone(), options)?;

        Ok(FolderView {
            session,
            watcher,
            show_hidden: options.show_hidden,
        })
    }

    pub fn session(&self) -> &NavigationSession {
        &self.session
    }

    pub fn location(&self) -> &Location {
        self.session.current()
    }

    /// Identifier carried by every event this view's watcher publishes.
    pub fn target(&self) -> TargetId {
        self.watcher.id()
    }

    /// Subscribes to this view's catalog events.
    pub fn events(&self) -> Receiver<WatchEvent> {
        self.watcher.subscribe()
    }

    pub fn show_hidden(&self) -> bool {
        self.show_hidden
    }

    pub fn set_show_hidden(&mut self, show_hidden: bool) {
        self.show_hidden = show_hidden;
        self.watcher.set_show_hidden(show_hidden);
    }

    pub fn enter(&mut self, location: Location, registry: &NameRegistry) -> Result<Navigation, Error> {
        let navigation = self.session.enter(location, registry)?;
        self.follow(&navigation);
        Ok(navigation)
    }

    pub fn go_up(&mut self, registry: &NameRegistry) -> Result<Navigation, Error> {
        let navigation = self.session.go_up(registry)?;
        self.follow(&navigation);
        Ok(navigation)
    }

    pub fn go_back(&mut self, registry: &NameRegistry) -> Result<Navigation, Error> {
        let navigation = self.session.go_back(registry)?;
        self.follow(&navigation);
        Ok(navigation)
    }

    pub fn go_forward(&mut self, registry: &NameRegistry) -> Result<Navigation, Error> {
        let navigation = self.session.go_forward(registry)?;
        self.follow(&navigation);
        Ok(navigation)
    }

    /// Revalidates the current location and asks for an immediate poll.
    pub fn reload(&self, registry: &NameRegistry) -> Result<(), Error> {
        self.session.reload(registry)?;
        self.watcher.poll_now();
        Ok(())
    }

    fn follow(&self, navigation: &Navigation) {
        if let Navigation::Moved(location) = navigation {
            self.watcher.retarget(location.clone());
        }
    }
}

/// Ordered set of open views with at most one active.
#[derive(Default)]
pub struct Tabs {
    views: Vec<FolderView>,
    active: Option<usize>,
}

impl Tabs {
    pub fn new() -> Tabs {
        Tabs::default()
    }

    /// Appends `view` and makes it active. Returns its index.
    pub fn open(&mut self, view: FolderView) -> usize {
        self.views.push(view);
        let index = self.views.len() - 1;
        self.active = Some(index);
        index
    }

    /// Closes the tab at `index`.
    ///
    /// When the active tab is closed the next one (or the previous, at the
    /// end) becomes active. Closing the last tab leaves no active view.
    pub fn close(&mut self, index: usize) -> Option<FolderView> {
        if index >= self.views.len() {
            return None;
        }

        let view = self.views.remove(index);
        self.active = match self.active {
            _ if self.views.is_empty() => None,
            Some(active) if active > index => Some(active - 1),
            Some(active) if active == index => Some(index.min(self.views.len() - 1)),
            other => other,
        };

        Some(view)
    }

    pub fn select(&mut self, index: usize) -> bool {
        if index < self.views.len() {
            self.active = Some(index);
            true
        } else {
            false
        }
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn active(&self) -> Option<&FolderView> {
        self.active.and_then(|index| self.views.get(index))
    }

    pub fn active_mut(&mut self) -> Option<&mut FolderView> {
        self.active.and_then(|index| self.views.get_mut(index))
    }

    /// Finds the tab whose watcher publishes events for `target`.
    pub fn position(&self, target: TargetId) -> Option<usize> {
        self.views.iter().position(|view| view.target() == target)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FolderView> {
        self.views.iter()
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}
