// SPDX-License-Identifier: Apache-2.0

//! Traits and types for file system watchers.

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("watcher initialization failed: {0}")]
    Init(String),

    #[error("watch failed: {0}")]
    Watch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("channel error: {0}")]
    Channel(String),
}

/// Kind of file system event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// A path appeared, including the target side of a rename
    Create,
    /// File content changed
    Modify,
    /// A path went away
    Remove,
    /// A path was renamed, `paths` holds `[from, to]`
    Rename,
}

/// A file system event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub paths: Vec<PathBuf>,
}

impl WatchEvent {
    pub fn new(kind: WatchEventKind, paths: Vec<PathBuf>) -> Self {
        Self { kind, paths }
    }

    pub fn create(path: PathBuf) -> Self {
        Self::new(WatchEventKind::Create, vec![path])
    }

    pub fn modify(path: PathBuf) -> Self {
        Self::new(WatchEventKind::Modify, vec![path])
    }

    pub fn remove(path: PathBuf) -> Self {
        Self::new(WatchEventKind::Remove, vec![path])
    }

    pub fn rename(from: PathBuf, to: PathBuf) -> Self {
        Self::new(WatchEventKind::Rename, vec![from, to])
    }
}

/// Trait for file system watchers.
///
/// Implementations can use native OS file system notifications or polling.
/// Watches are never removed: a directory that held a harvested file keeps
/// being watched for the life of the process.
pub trait FileWatcher {
    /// Watch a directory (non-recursively).
    fn watch(&mut self, dir: &Path) -> Result<(), WatcherError>;

    /// Receive events with a timeout.
    ///
    /// Blocks until events are available or the timeout expires.
    /// Returns an empty vector if the timeout expires with no events.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Vec<WatchEvent>, WatcherError>;

    /// Name of the watcher backend for logging.
    fn backend_name(&self) -> &'static str;
}
