//! Minimal reader for freedesktop `.desktop` application shortcuts.
//!
//! Only the untranslated `Name` key of the `[Desktop Entry]` group is needed
//! to label a shortcut, so that's all this module extracts.

use std::fs::File;
use std::io::Read;
use std::path::Path;

pub const EXTENSION: &str = "desktop";
const GROUP: &str = "Desktop Entry";
const NAME_KEY: &str = "Name";
const MAX_ENTRY_SIZE: u64 = 64 * 1024;

/// Returns `true` if `path` has the `.desktop` extension.
pub fn is_desktop_entry(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == EXTENSION)
}

/// Reads the declared display name of the shortcut at `path`.
///
/// Returns `None` if the file can't be read or declares no name.
pub fn read_name(path: &Path) -> Option<String> {
    let mut content = String::new();
    File::open(path)
        .ok()?
        .take(MAX_ENTRY_SIZE)
        .read_to_string(&mut content)
        .ok()?;
    parse_name(&content)
}

/// Extracts `Name` from the `[Desktop Entry]` group of `content`.
///
/// ```
/// use wayfinder_core::desktop_entry::parse_name;
///
/// let entry = "[Desktop Entry]\nType=Application\nName=Text Editor\nName[fr]=Éditeur\n";
/// assert_eq!(parse_name(entry).as_deref(), Some("Text Editor"));
/// ```
pub fn parse_name(content: &str) -> Option<String> {
    let mut in_group = false;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(group) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            in_group = group == GROUP;
            continue;
        }

        if !in_group {
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            if key.trim() == NAME_KEY {
                let value = unescape(value.trim());
                return (!value.is_empty()).then_some(value);
            }
        }
    }

    None
}

fn unescape(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut chars = value.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('s') => result.push(' '),
            Some('n') => result.push('\n'),
            Some('t') => result.push('\t'),
            Some('r') => result.push('\r'),
            Some('\\') => result.push('\\'),
            Some(other) => {
                result.push('\\');
                result.push(other);
            }
            None => result.push('\\'),
        }
    }

    result
}
