// SPDX-License-Identifier: Apache-2.0

//! Native file system watcher using the `notify` crate.
//!
//! Uses OS-level file system notifications:
//! - Linux: inotify
//! - macOS: FSEvents

use std::path::Path;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError, channel};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use super::traits::{FileWatcher, WatchEvent, WatchEventKind, WatcherError};

/// Native file system watcher using OS-level notifications.
pub struct NativeWatcher {
    watcher: RecommendedWatcher,
    receiver: Receiver<Result<Event, notify::Error>>,
}

impl NativeWatcher {
    pub fn new() -> Result<Self, WatcherError> {
        let (tx, rx) = channel();

        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default(),
        )
        .map_err(|e| WatcherError::Init(e.to_string()))?;

        Ok(Self {
            watcher,
            receiver: rx,
        })
    }

    /// Convert a notify event to our WatchEvent type
    fn convert_event(event: Event) -> Option<WatchEvent> {
        if event.paths.is_empty() {
            return None;
        }

        let kind = match event.kind {
            EventKind::Create(_) => WatchEventKind::Create,
            EventKind::Remove(_) => WatchEventKind::Remove,
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
                WatchEventKind::Rename
            }
            // The target side of a rename is a new name for some file
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => WatchEventKind::Create,
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                debug!(paths = ?event.paths, "Ignoring rename source event");
                return None;
            }
            // Backends that cannot pair rename halves report each side on its own
            EventKind::Modify(ModifyKind::Name(_)) => {
                if event.paths[0].exists() {
                    WatchEventKind::Create
                } else {
                    WatchEventKind::Remove
                }
            }
            EventKind::Modify(_) => WatchEventKind::Modify,
            EventKind::Access(_) | EventKind::Other | EventKind::Any => return None,
        };

        Some(WatchEvent::new(kind, event.paths))
    }

    fn drain(&mut self, events: &mut Vec<WatchEvent>) -> Result<(), WatcherError> {
        loop {
            match self.receiver.try_recv() {
                Ok(res) => Self::push(res, events),
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => {
                    return Err(WatcherError::Channel("watcher channel disconnected".into()));
                }
            }
        }
    }

    fn push(res: Result<Event, notify::Error>, events: &mut Vec<WatchEvent>) {
        match res {
            Ok(event) => events.extend(Self::convert_event(event)),
            Err(e) => warn!(error = %e, "File watcher error"),
        }
    }
}

impl FileWatcher for NativeWatcher {
    fn watch(&mut self, dir: &Path) -> Result<(), WatcherError> {
        self.watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| WatcherError::Watch(e.to_string()))
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Vec<WatchEvent>, WatcherError> {
        let mut events = Vec::new();

        match self.receiver.recv_timeout(timeout) {
            Ok(res) => Self::push(res, &mut events),
            Err(RecvTimeoutError::Timeout) => return Ok(events),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(WatcherError::Channel("watcher channel disconnected".into()));
            }
        }

        self.drain(&mut events)?;
        Ok(events)
    }

    fn backend_name(&self) -> &'static str {
        #[cfg(target_os = "linux")]
        {
            "inotify"
        }
        #[cfg(target_os = "macos")]
        {
            "FSEvents"
        }
        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        {
            "native"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange};
    use std::fs::File;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn notify_event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for p in paths {
            event = event.add_path(PathBuf::from(p));
        }
        event
    }

    #[test]
    fn test_convert_paired_rename() {
        let event = notify_event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/tmp/a.log", "/tmp/a.log.1"],
        );
        assert_eq!(
            NativeWatcher::convert_event(event),
            Some(WatchEvent::rename("/tmp/a.log".into(), "/tmp/a.log.1".into()))
        );
    }

    #[test]
    fn test_convert_rename_halves() {
        let to = notify_event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), &["/tmp/b"]);
        assert_eq!(
            NativeWatcher::convert_event(to),
            Some(WatchEvent::create("/tmp/b".into()))
        );

        let from = notify_event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &["/tmp/a"]);
        assert_eq!(NativeWatcher::convert_event(from), None);
    }

    #[test]
    fn test_convert_create_and_modify() {
        let create = notify_event(EventKind::Create(CreateKind::File), &["/tmp/new.log"]);
        assert_eq!(
            NativeWatcher::convert_event(create).map(|e| e.kind),
            Some(WatchEventKind::Create)
        );

        let modify = notify_event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/tmp/new.log"],
        );
        assert_eq!(
            NativeWatcher::convert_event(modify).map(|e| e.kind),
            Some(WatchEventKind::Modify)
        );
    }

    #[test]
    fn test_native_watcher_detects_file_create() {
        let temp_dir = TempDir::new().unwrap();
        let mut watcher = NativeWatcher::new().unwrap();
        watcher.watch(temp_dir.path()).unwrap();

        let file_path = temp_dir.path().join("test.log");
        File::create(&file_path).unwrap();

        let events = watcher.recv_timeout(Duration::from_secs(2)).unwrap();
        let has_create = events.iter().any(|e| e.kind == WatchEventKind::Create);
        assert!(has_create, "Should have a create event");
    }

    #[test]
    fn test_native_watcher_backend_name() {
        let watcher = NativeWatcher::new().unwrap();

        #[cfg(target_os = "linux")]
        assert_eq!(watcher.backend_name(), "inotify");

        #[cfg(not(target_os = "linux"))]
        assert!(!watcher.backend_name().is_empty());
    }
}
