// SPDX-License-Identifier: Apache-2.0

//! Polling-based file watcher as a fallback for systems where native
//! file system notifications are unavailable or unreliable (e.g., NFS).
//!
//! Each poll lists the watched directories and compares the result with the
//! previous listing. A file whose identity disappeared from one path and
//! appeared under another is reported as a rename.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use super::traits::{FileWatcher, WatchEvent, WatcherError};
use crate::receivers::file::input::FileId;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Snapshot {
    id: FileId,
    modified: Option<SystemTime>,
    size: u64,
}

impl Snapshot {
    fn from_metadata(metadata: &fs::Metadata) -> Self {
        Self {
            id: FileId::from_metadata(metadata),
            modified: metadata.modified().ok(),
            size: metadata.len(),
        }
    }
}

/// Polling-based file watcher.
pub struct PollWatcher {
    watched_dirs: Vec<PathBuf>,
    files: HashMap<PathBuf, Snapshot>,
    poll_interval: Duration,
    last_poll: Instant,
    pending_events: Vec<WatchEvent>,
}

impl PollWatcher {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            watched_dirs: Vec::new(),
            files: HashMap::new(),
            poll_interval,
            last_poll: Instant::now(),
            pending_events: Vec::new(),
        }
    }

    fn list(&self) -> HashMap<PathBuf, Snapshot> {
        let mut files = HashMap::with_capacity(self.files.len());
        for dir in &self.watched_dirs {
            let entries = match fs::read_dir(dir) {
                Ok(e) => e,
                Err(e) => {
                    tracing::debug!(path = ?dir, error = %e, "Error scanning directory");
                    continue;
                }
            };
            for entry in entries.flatten() {
                match entry.metadata() {
                    Ok(m) if m.is_file() => {
                        files.insert(entry.path(), Snapshot::from_metadata(&m));
                    }
                    _ => {}
                }
            }
        }
        files
    }

    /// Compare the current listing with the previous one and queue events.
    fn scan_all(&mut self) {
        let current = self.list();
        let mut events = Vec::new();

        let vanished: HashMap<FileId, PathBuf> = self
            .files
            .iter()
            .filter(|(path, _)| !current.contains_key(*path))
            .map(|(path, snap)| (snap.id, path.clone()))
            .collect();
        let mut renamed_away: HashSet<PathBuf> = HashSet::new();

        for (path, snap) in &current {
            match self.files.get(path) {
                None => match vanished.get(&snap.id) {
                    Some(old) => {
                        renamed_away.insert(old.clone());
                        events.push(WatchEvent::rename(old.clone(), path.clone()));
                    }
                    None => events.push(WatchEvent::create(path.clone())),
                },
                Some(prev) if prev.id != snap.id => {
                    // replaced in place between two polls
                    events.push(WatchEvent::create(path.clone()));
                }
                Some(prev) if prev != snap => events.push(WatchEvent::modify(path.clone())),
                Some(_) => {}
            }
        }

        for path in self.files.keys() {
            if !current.contains_key(path) && !renamed_away.contains(path) {
                events.push(WatchEvent::remove(path.clone()));
            }
        }

        self.files = current;
        self.pending_events.extend(events);
        self.last_poll = Instant::now();
    }
}

impl FileWatcher for PollWatcher {
    fn watch(&mut self, dir: &Path) -> Result<(), WatcherError> {
        if !fs::metadata(dir)?.is_dir() {
            return Err(WatcherError::Watch(format!("{:?} is not a directory", dir)));
        }
        if self.watched_dirs.iter().any(|d| d == dir) {
            return Ok(());
        }
        self.watched_dirs.push(dir.to_path_buf());

        // Files already present are the baseline, not creations
        for (path, snap) in self.list() {
            self.files.entry(path).or_insert(snap);
        }
        Ok(())
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Vec<WatchEvent>, WatcherError> {
        let deadline = Instant::now() + timeout;

        loop {
            if self.last_poll.elapsed() >= self.poll_interval {
                self.scan_all();
            }

            if !self.pending_events.is_empty() {
                return Ok(std::mem::take(&mut self.pending_events));
            }

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }

            // Sleep until next poll or timeout, whichever is sooner
            let time_to_next_poll = self.poll_interval.saturating_sub(self.last_poll.elapsed());
            let time_to_deadline = deadline.saturating_duration_since(Instant::now());
            let sleep_duration = time_to_next_poll.min(time_to_deadline);

            if !sleep_duration.is_zero() {
                std::thread::sleep(sleep_duration);
            }
        }
    }

    fn backend_name(&self) -> &'static str {
        "poll"
    }
}
