//! Directory observation and navigation engine for file browsers.
//!
//! The crate lists, sorts and watches single directories and keeps per-view
//! navigation state. Rendering, icons, clipboard handling and volume
//! monitoring belong to the embedding UI, which talks to this crate through:
//!
//! - [`view::FolderView`] / [`view::Tabs`] to open views and navigate,
//! - [`watcher::WatchEvent`] and [`watcher::CatalogObserver`] to render catalogs,
//! - [`registry::NameRegistry`] to name locations and track mounts.

pub mod catalog;
pub mod desktop_entry;
pub mod error;
pub mod helpers;
pub mod location;
pub mod logging;
pub mod navigation;
pub mod registry;
pub mod settings;
pub mod view;
pub mod watcher;

pub use crate::error::{Error, ErrorKind};
