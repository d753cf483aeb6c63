// SPDX-License-Identifier: Apache-2.0

//! Translation of raw file system events into rotation signals.
//!
//! logrotate and similar tools rotate files in a few well known ways: rename
//! the live file to `name.1` (or `name-YYYYMMDD` with `dateext`) and create a
//! new one, or copy the live file to its rotated name and truncate it in place
//! (`copytruncate`, which goes through a `logrotate_temp` file). The harvesters
//! only need to know two things out of this: that the file they are reading
//! now lives under another path, and that a file holding a copy of their
//! content appeared.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

use super::traits::{WatchEvent, WatchEventKind};
use crate::receivers::file::input::FileId;
use crate::receivers::file::registry::Registry;

const LOGROTATE_TEMP_MARKER: &str = "logrotate_temp";

static ROTATION_SUFFIXES: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        // numeric suffix, logrotate's default
        Regex::new(r"\.\d+$").expect("valid numeric suffix pattern"),
        // dateext
        Regex::new(r"-\d{8}$").expect("valid dateext suffix pattern"),
    ]
});

/// Rotation facts derived from file system events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationSignal {
    /// The file at `from` is now reachable at `to`.
    Renamed { from: PathBuf, to: PathBuf },
    /// `successor` was created with a rotated name of the tracked path.
    SuccessorCreated { tracked: PathBuf, successor: PathBuf },
}

/// Strip a logrotate suffix from `path`, if it carries one.
pub fn strip_rotation_suffix(path: &Path) -> Option<PathBuf> {
    let s = path.to_str()?;
    ROTATION_SUFFIXES
        .iter()
        .find_map(|re| re.find(s))
        .map(|m| PathBuf::from(&s[..m.start()]))
}

fn is_logrotate_temp(path: &Path) -> bool {
    path.to_string_lossy().contains(LOGROTATE_TEMP_MARKER)
}

/// Derive rotation signals from one watcher event.
pub fn classify(event: &WatchEvent, registry: &Registry) -> Vec<RotationSignal> {
    match event.kind {
        WatchEventKind::Rename => match event.paths.as_slice() {
            [from, to] => vec![RotationSignal::Renamed {
                from: from.clone(),
                to: to.clone(),
            }],
            _ => Vec::new(),
        },
        WatchEventKind::Create => event
            .paths
            .iter()
            .filter_map(|p| classify_created(p, registry))
            .collect(),
        _ => Vec::new(),
    }
}

fn classify_created(path: &Path, registry: &Registry) -> Option<RotationSignal> {
    // A tracked file showing up under a new name is a rename
    if let Ok(id) = FileId::from_path(path) {
        if let Some(handle) = registry.lookup_by_identity(id) {
            let current = handle.path();
            if current == path {
                return None;
            }
            return Some(RotationSignal::Renamed {
                from: current,
                to: path.to_path_buf(),
            });
        }
    }

    if is_logrotate_temp(path) {
        debug!(path = ?path, "Ignoring logrotate temp file");
        return None;
    }

    let tracked = strip_rotation_suffix(path)?;
    registry.lookup_by_path(&tracked)?;
    Some(RotationSignal::SuccessorCreated {
        tracked,
        successor: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receivers::file::registry::HarvesterHandle;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_strip_rotation_suffix() {
        assert_eq!(
            strip_rotation_suffix(Path::new("/var/log/app.log.1")),
            Some(PathBuf::from("/var/log/app.log"))
        );
        assert_eq!(
            strip_rotation_suffix(Path::new("/var/log/app.log.12")),
            Some(PathBuf::from("/var/log/app.log"))
        );
        assert_eq!(
            strip_rotation_suffix(Path::new("/var/log/app.log-20240131")),
            Some(PathBuf::from("/var/log/app.log"))
        );
        assert_eq!(strip_rotation_suffix(Path::new("/var/log/app.log")), None);
        assert_eq!(strip_rotation_suffix(Path::new("/var/log/app.log-2024")), None);
    }

    #[test]
    fn test_native_rename_passes_through() {
        let registry = Registry::new();
        let event = WatchEvent::rename("/tmp/a.log".into(), "/tmp/a.log.1".into());

        assert_eq!(
            classify(&event, &registry),
            vec![RotationSignal::Renamed {
                from: "/tmp/a.log".into(),
                to: "/tmp/a.log.1".into(),
            }]
        );
    }

    #[test]
    fn test_create_of_tracked_identity_is_rename() {
        let dir = TempDir::new().unwrap();
        let live = dir.path().join("app.log");
        let rotated = dir.path().join("app.log.1");
        std::fs::write(&live, b"x\n").unwrap();

        let registry = Registry::new();
        let handle = Arc::new(HarvesterHandle::new(
            live.clone(),
            Some(FileId::from_path(&live).unwrap()),
            BTreeMap::new(),
        ));
        registry.register(handle).unwrap();

        std::fs::rename(&live, &rotated).unwrap();
        let signals = classify(&WatchEvent::create(rotated.clone()), &registry);
        assert_eq!(
            signals,
            vec![RotationSignal::Renamed {
                from: live,
                to: rotated
            }]
        );
    }

    #[test]
    fn test_create_with_suffix_is_successor() {
        let dir = TempDir::new().unwrap();
        let live = dir.path().join("app.log");
        let copy = dir.path().join("app.log.1");
        std::fs::write(&live, b"x\n").unwrap();

        let registry = Registry::new();
        let handle = Arc::new(HarvesterHandle::new(
            live.clone(),
            Some(FileId::from_path(&live).unwrap()),
            BTreeMap::new(),
        ));
        registry.register(handle).unwrap();

        std::fs::copy(&live, &copy).unwrap();
        let signals = classify(&WatchEvent::create(copy.clone()), &registry);
        assert_eq!(
            signals,
            vec![RotationSignal::SuccessorCreated {
                tracked: live,
                successor: copy
            }]
        );
    }

    #[test]
    fn test_untracked_and_temp_creates_are_ignored() {
        let dir = TempDir::new().unwrap();
        let temp = dir.path().join("app.log.logrotate_temp");
        let other = dir.path().join("other.log.1");
        std::fs::write(&temp, b"").unwrap();
        std::fs::write(&other, b"").unwrap();

        let registry = Registry::new();
        assert!(classify(&WatchEvent::create(temp), &registry).is_empty());
        assert!(classify(&WatchEvent::create(other), &registry).is_empty());
        assert!(
            classify(&WatchEvent::modify(dir.path().join("x")), &registry).is_empty()
        );
    }
}
