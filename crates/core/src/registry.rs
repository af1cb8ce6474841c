//! Human-facing names for locations.
//!
//! A [`NameRegistry`] is built once per process and handed by reference to
//! whatever renders locations: views, breadcrumbs, the sidebar. It knows about
//! three kinds of names:
//!
//! - built-in places (filesystem root, home, XDG special folders), fixed at
//!   construction,
//! - mounted volumes, added and removed by the mount-monitoring layer,
//! - `.desktop` application shortcuts, whose declared name is read on lookup.
//!
//! Anything else is named after its last path segment, so a lookup never fails.
//!
//! Removing a mount also revokes its location: navigation into or below it
//! fails with [`Error::InvalidTarget`] until the volume is mounted again.

use crate::desktop_entry;
use crate::error::Error;
use crate::location::Location;
use indexmap::IndexMap;
use nix::sys::statvfs::statvfs;
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;

const ROOT_NAME: &str = "Computer";
const HOME_NAME: &str = "Home";
const USER_DIRS_FILE: &str = "user-dirs.dirs";

/// The XDG user directories shown as built-in places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialFolder {
    Desktop,
    Documents,
    Downloads,
    Music,
    Pictures,
    Videos,
}

impl SpecialFolder {
    pub const ALL: [SpecialFolder; 6] = [
        SpecialFolder::Desktop,
        SpecialFolder::Documents,
        SpecialFolder::Downloads,
        SpecialFolder::Music,
        SpecialFolder::Pictures,
        SpecialFolder::Videos,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SpecialFolder::Desktop => "Desktop",
            SpecialFolder::Documents => "Documents",
            SpecialFolder::Downloads => "Downloads",
            SpecialFolder::Music => "Music",
            SpecialFolder::Pictures => "Pictures",
            SpecialFolder::Videos => "Videos",
        }
    }

    fn xdg_key(self) -> &'static str {
        match self {
            SpecialFolder::Desktop => "XDG_DESKTOP_DIR",
            SpecialFolder::Documents => "XDG_DOCUMENTS_DIR",
            SpecialFolder::Downloads => "XDG_DOWNLOAD_DIR",
            SpecialFolder::Music => "XDG_MUSIC_DIR",
            SpecialFolder::Pictures => "XDG_PICTURES_DIR",
            SpecialFolder::Videos => "XDG_VIDEOS_DIR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceKind {
    Root,
    Home,
    Special(SpecialFolder),
    Mount,
}

/// A named location listed in the sidebar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Place {
    pub location: Location,
    pub name: String,
    pub kind: PlaceKind,
}

/// Capacity of the filesystem holding a location, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountSpace {
    pub total: u64,
    pub used: u64,
    pub free: u64,
}

#[derive(Debug, Clone)]
pub struct NameRegistry {
    home: Option<Location>,
    builtins: IndexMap<Location, Place>,
    mounts: IndexMap<Location, Place>,
    revoked: BTreeSet<Location>,
}

impl NameRegistry {
    /// Creates a registry with the root and, if known, the home directory.
    pub fn new(home: Option<Location>) -> NameRegistry {
        let mut builtins = IndexMap::new();

        if let Some(home) = &home {
            builtins.insert(
                home.clone(),
                Place {
                    location: home.clone(),
                    name: HOME_NAME.to_string(),
                    kind: PlaceKind::Home,
                },
            );
        }

        let root = Location::root();
        builtins.entry(root.clone()).or_insert(Place {
            location: root,
            name: ROOT_NAME.to_string(),
            kind: PlaceKind::Root,
        });

        NameRegistry {
            home,
            builtins,
            mounts: IndexMap::new(),
            revoked: BTreeSet::new(),
        }
    }

    /// Adds special folders as built-in places.
    ///
    /// Folders that resolve to an existing built-in (XDG points disabled
    /// folders at `$HOME`) are ignored. Special folders are listed before the
    /// root, right after home.
    pub fn with_special_folders<I>(mut self, folders: I) -> NameRegistry
    where
        I: IntoIterator<Item = (SpecialFolder, Location)>,
    {
        let root = Location::root();
        let root_place = self.builtins.shift_remove(&root);

        for (folder, location) in folders {
            if self.builtins.contains_key(&location) || location.is_root() {
                continue;
            }
            self.builtins.insert(
                location.clone(),
                Place {
                    location,
                    name: folder.name().to_string(),
                    kind: PlaceKind::Special(folder),
                },
            );
        }

        if let Some(place) = root_place {
            self.builtins.insert(root, place);
        }

        self
    }

    /// Builds a registry from `$HOME` and the XDG user-dirs configuration.
    pub fn from_environment() -> NameRegistry {
        let home = env::var_os("HOME").and_then(|home| Location::new(home).ok());
        let registry = NameRegistry::new(home.clone());

        let Some(home) = home else {
            tracing::warn!("HOME is not set, special folders are unavailable");
            return registry;
        };

        let config_dir = env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .filter(|dir| dir.is_absolute())
            .unwrap_or_else(|| home.as_path().join(".config"));

        let registry = match fs::read_to_string(config_dir.join(USER_DIRS_FILE)) {
            Ok(content) => registry.with_special_folders(parse_user_dirs(&content, &home)),
            Err(err) => {
                tracing::debug!(error = %err, "no user-dirs configuration");
                registry
            }
        };

        tracing::info!(
            home = %home,
            config_dir = %config_dir.display(),
            places = registry.places().count(),
            "name registry loaded"
        );
        registry
    }

    pub fn home(&self) -> Option<&Location> {
        self.home.as_ref()
    }

    /// Returns the name to show for `location`.
    ///
    /// Built-in places win, then mounted volumes, then the declared name of a
    /// `.desktop` shortcut, then the last path segment (`/` for the root when
    /// nothing else applies).
    pub fn display_name(&self, location: &Location) -> String {
        if let Some(place) = self.place(location) {
            return place.name.clone();
        }

        if desktop_entry::is_desktop_entry(location.as_path()) {
            if let Some(name) = desktop_entry::read_name(location.as_path()) {
                return name;
            }
        }

        location.name().into_owned()
    }

    pub fn place(&self, location: &Location) -> Option<&Place> {
        self.builtins
            .get(location)
            .or_else(|| self.mounts.get(location))
    }

    /// Built-in places in insertion order, then mounts in mount order.
    pub fn places(&self) -> impl Iterator<Item = &Place> {
        self.builtins.values().chain(self.mounts.values())
    }

    /// Registers a mounted volume.
    ///
    /// Returns `false` if `location` is a built-in place, which can't be
    /// renamed. Mounting again at a previously removed location lifts its
    /// revocation.
    pub fn add_mount(&mut self, location: Location, name: impl Into<String>) -> bool {
        if self.builtins.contains_key(&location) {
            tracing::warn!(location = %location, "ignoring mount over a built-in place");
            return false;
        }

        let name = name.into();
        tracing::info!(location = %location, name = %name, "mount added");
        self.revoked.remove(&location);
        self.mounts.insert(
            location.clone(),
            Place {
                location,
                name,
                kind: PlaceKind::Mount,
            },
        );
        true
    }

    /// Unregisters a mounted volume and revokes its location.
    pub fn remove_mount(&mut self, location: &Location) -> Option<Place> {
        let place = self.mounts.shift_remove(location)?;
        tracing::info!(location = %location, "mount removed");
        self.revoked.insert(location.clone());
        Some(place)
    }

    /// Removes mounts whose root no longer exists, revoking them like
    /// [`remove_mount`](Self::remove_mount) does.
    pub fn prune(&mut self) -> Vec<Place> {
        let vanished: Vec<Location> = self
            .mounts
            .keys()
            .filter(|location| !location.as_path().exists())
            .cloned()
            .collect();

        vanished
            .iter()
            .filter_map(|location| self.remove_mount(location))
            .collect()
    }

    /// Returns `true` if `location` is at or below a removed mount.
    ///
    /// A volume mounted later inside a revoked tree lifts the revocation for
    /// its own subtree only.
    pub fn is_revoked(&self, location: &Location) -> bool {
        self.revoked
            .iter()
            .filter(|revoked| location.is_within(revoked))
            .any(|revoked| {
                !self
                    .mounts
                    .keys()
                    .any(|mount| location.is_within(mount) && mount.is_within(revoked))
            })
    }
}

impl Default for NameRegistry {
    fn default() -> Self {
        NameRegistry::new(None)
    }
}

/// Parses the shell-style assignments of `user-dirs.dirs`.
///
/// Values are double-quoted and may start with `$HOME`; anything that doesn't
/// end up absolute, or that points at `home` itself, is skipped.
pub fn parse_user_dirs(content: &str, home: &Location) -> Vec<(SpecialFolder, Location)> {
    let mut folders = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let Some(folder) = SpecialFolder::ALL
            .into_iter()
            .find(|folder| folder.xdg_key() == key.trim())
        else {
            continue;
        };

        let value = value.trim().trim_matches('"');
        let path = match value.strip_prefix("$HOME") {
            Some(rest) => format!("{}{}", home, rest),
            None => value.to_string(),
        };

        match Location::new(&path) {
            Ok(location) if &location != home => folders.push((folder, location)),
            _ => continue,
        }
    }

    folders
}

/// Reports total, used and free space of the filesystem holding `location`.
///
/// # Errors
///
/// Returns [`Error::NotReadable`] if the filesystem can't be queried.
pub fn mount_space(location: &Location) -> Result<MountSpace, Error> {
    let stats = statvfs(location.as_path())
        .map_err(|errno| Error::not_readable(location.as_path(), &io::Error::from(errno)))?;

    let fragment = stats.fragment_size() as u64;
    let blocks = stats.blocks() as u64;
    let free_blocks = stats.blocks_free() as u64;
    let available_blocks = stats.blocks_available() as u64;

    Ok(MountSpace {
        total: blocks * fragment,
        used: blocks.saturating_sub(free_blocks) * fragment,
        free: available_blocks * fragment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn loc(path: &str) -> Location {
        Location::new(path).unwrap()
    }

    fn registry() -> NameRegistry {
        NameRegistry::new(Some(loc("/home/ana"))).with_special_folders([
            (SpecialFolder::Documents, loc("/home/ana/Documentos")),
            (SpecialFolder::Music, loc("/home/ana")),
        ])
    }

    #[test]
    fn test_builtin_names_take_precedence() {
        let registry = registry();
        assert_eq!(registry.display_name(&loc("/home/ana")), "Home");
        assert_eq!(registry.display_name(&Location::root()), "Computer");
        assert_eq!(registry.display_name(&loc("/home/ana/Documentos")), "Documents");
    }

    #[test]
    fn test_unknown_location_falls_back_to_last_segment() {
        let registry = NameRegistry::default();
        assert_eq!(registry.display_name(&loc("/home/ana/projects")), "projects");
        assert_eq!(registry.display_name(&loc("/srv/backup.tar")), "backup.tar");
    }

    #[test]
    fn test_special_folder_pointing_at_home_is_ignored() {
        let registry = registry();
        let kinds: Vec<_> = registry.places().map(|place| place.kind).collect();
        assert_eq!(
            kinds,
            vec![
                PlaceKind::Home,
                PlaceKind::Special(SpecialFolder::Documents),
                PlaceKind::Root,
            ]
        );
    }

    #[test]
    fn test_mounts_are_named_and_listed_after_builtins() {
        let mut registry = registry();
        assert!(registry.add_mount(loc("/media/ana/USB"), "Backup Drive"));
        assert!(!registry.add_mount(loc("/home/ana"), "Not allowed"));

        assert_eq!(registry.display_name(&loc("/media/ana/USB")), "Backup Drive");
        assert_eq!(registry.display_name(&loc("/home/ana")), "Home");
        let last = registry.places().last().map(|place| place.kind);
        assert_eq!(last, Some(PlaceKind::Mount));
    }

    #[test]
    fn test_remove_mount_revokes_location_and_descendants() {
        let mut registry = registry();
        let usb = loc("/media/ana/USB");
        registry.add_mount(usb.clone(), "USB");

        let removed = registry.remove_mount(&usb);
        assert_eq!(removed.map(|place| place.name), Some("USB".to_string()));
        assert_eq!(registry.display_name(&usb), "USB");
        assert!(registry.is_revoked(&usb));
        assert!(registry.is_revoked(&loc("/media/ana/USB/photos")));
        assert!(!registry.is_revoked(&loc("/media/ana/USB2")));
        assert!(registry.remove_mount(&usb).is_none());

        registry.add_mount(usb.clone(), "USB");
        assert!(!registry.is_revoked(&usb));
    }

    #[test]
    fn test_mount_below_removed_mount_is_reachable() {
        let mut registry = registry();
        let usb = loc("/media/ana/USB");
        let part = loc("/media/ana/USB/part1");
        registry.add_mount(usb.clone(), "USB");
        registry.remove_mount(&usb);

        assert!(registry.add_mount(part.clone(), "Partition"));

        assert!(!registry.is_revoked(&part));
        assert!(!registry.is_revoked(&loc("/media/ana/USB/part1/photos")));
        assert!(registry.is_revoked(&usb));
        assert!(registry.is_revoked(&loc("/media/ana/USB/part2")));

        registry.remove_mount(&part);
        assert!(registry.is_revoked(&part));
    }

    #[test]
    fn test_prune_drops_vanished_mounts() -> Result<(), anyhow::Error> {
        let temp_dir = TempDir::new()?;
        let present = Location::new(temp_dir.path())?;
        let gone = present.child("ejected")?;
        let mut registry = NameRegistry::default();
        registry.add_mount(present.clone(), "Present");
        registry.add_mount(gone.clone(), "Ejected");

        let pruned = registry.prune();

        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].location, gone);
        assert!(registry.is_revoked(&gone));
        assert!(registry.place(&present).is_some());
        Ok(())
    }

    #[test]
    fn test_desktop_entry_name_is_used() -> Result<(), anyhow::Error> {
        let temp_dir = TempDir::new()?;
        let shortcut = temp_dir.path().join("org.example.Editor.desktop");
        fs::write(&shortcut, "[Desktop Entry]\nType=Application\nName=Editor\n")?;
        let nameless = temp_dir.path().join("broken.desktop");
        fs::write(&nameless, "[Desktop Entry]\nType=Application\n")?;

        let registry = NameRegistry::default();
        assert_eq!(registry.display_name(&Location::new(&shortcut)?), "Editor");
        assert_eq!(registry.display_name(&Location::new(&nameless)?), "broken.desktop");
        Ok(())
    }

    #[test]
    fn test_parse_user_dirs() {
        let home = loc("/home/ana");
        let content = r#"
# This file is written by xdg-user-dirs-update
XDG_DESKTOP_DIR="$HOME/Escritorio"
XDG_DOWNLOAD_DIR="$HOME/Descargas"
XDG_TEMPLATES_DIR="$HOME/Plantillas"
XDG_MUSIC_DIR="/data/music"
XDG_VIDEOS_DIR="$HOME/"
XDG_PICTURES_DIR="relative/path"
"#;

        let folders = parse_user_dirs(content, &home);

        assert_eq!(
            folders,
            vec![
                (SpecialFolder::Desktop, loc("/home/ana/Escritorio")),
                (SpecialFolder::Downloads, loc("/home/ana/Descargas")),
                (SpecialFolder::Music, loc("/data/music")),
            ]
        );
    }

    #[test]
    fn test_mount_space_reports_capacity() -> Result<(), anyhow::Error> {
        let temp_dir = TempDir::new()?;
        let space = mount_space(&Location::new(temp_dir.path())?)?;
        assert!(space.total > 0);
        assert!(space.used <= space.total);
        assert!(space.free <= space.total);

        let err = mount_space(&Location::new(temp_dir.path().join("missing"))?).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotReadable);
        Ok(())
    }
}
