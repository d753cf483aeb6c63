// SPDX-License-Identifier: Apache-2.0

//! Index of the harvesters currently reading files.
//!
//! Every registered harvester is reachable both by the identity of its file and
//! by the path it currently believes the file lives at. Both keys always point
//! at the same harvester. Renames move the path key and leave the identity key
//! alone.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

use crate::receivers::file::error::{Error, Result};
use crate::receivers::file::input::FileId;
use crate::receivers::file::watcher::RotationSignal;

/// State of a harvester that other tasks need to see or change.
#[derive(Debug)]
pub struct HarvesterHandle {
    file_id: Option<FileId>,
    path: RwLock<PathBuf>,
    moved: AtomicBool,
    successor: Mutex<Option<PathBuf>>,
    fields: BTreeMap<String, String>,
}

impl HarvesterHandle {
    pub fn new(path: PathBuf, file_id: Option<FileId>, fields: BTreeMap<String, String>) -> Self {
        Self {
            file_id,
            path: RwLock::new(path),
            moved: AtomicBool::new(false),
            successor: Mutex::new(None),
            fields,
        }
    }

    pub fn file_id(&self) -> Option<FileId> {
        self.file_id
    }

    /// The path the file is currently known under.
    pub fn path(&self) -> PathBuf {
        self.path
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the file was renamed away from the path it was opened at.
    pub fn moved(&self) -> bool {
        self.moved.load(Ordering::Acquire)
    }

    /// Take the successor path recorded by a copy-truncate rotation.
    pub fn take_successor(&self) -> Option<PathBuf> {
        self.successor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn set_successor(&self, successor: PathBuf) {
        *self.successor.lock().unwrap_or_else(PoisonError::into_inner) = Some(successor);
    }

    fn relabel(&self, path: PathBuf) {
        *self.path.write().unwrap_or_else(PoisonError::into_inner) = path;
        self.moved.store(true, Ordering::Release);
    }

    pub fn info(&self) -> HarvesterInfo {
        HarvesterInfo {
            path: self.path().to_string_lossy().into_owned(),
            id: self.file_id.map(|id| id.to_string()),
            moved: self.moved(),
            fields: self.fields.clone(),
        }
    }
}

/// Serializable view of a running harvester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarvesterInfo {
    pub path: String,
    pub id: Option<String>,
    pub moved: bool,
    pub fields: BTreeMap<String, String>,
}

#[derive(Default)]
struct Indices {
    by_id: HashMap<FileId, Arc<HarvesterHandle>>,
    by_path: HashMap<PathBuf, Arc<HarvesterHandle>>,
}

#[derive(Default)]
pub struct Registry {
    inner: RwLock<Indices>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a harvester under its identity and current path.
    ///
    /// Fails when either key is already taken by another harvester.
    pub fn register(&self, handle: Arc<HarvesterHandle>) -> Result<()> {
        let path = handle.path();
        let Some(id) = handle.file_id() else {
            return Err(Error::MissingIdentity(path));
        };

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.by_id.contains_key(&id) {
            return Err(Error::IdentityInUse(id));
        }
        if inner.by_path.contains_key(&path) {
            return Err(Error::PathInUse(path));
        }

        inner.by_id.insert(id, handle.clone());
        inner.by_path.insert(path.clone(), handle);
        debug!(path = ?path, file_id = %id, "Registered harvester");
        Ok(())
    }

    /// Remove a harvester. Keys that now belong to another harvester are kept.
    pub fn unregister(&self, handle: &Arc<HarvesterHandle>) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(id) = handle.file_id() {
            if inner.by_id.get(&id).is_some_and(|h| Arc::ptr_eq(h, handle)) {
                inner.by_id.remove(&id);
            }
        }

        let path = handle.path();
        if inner.by_path.get(&path).is_some_and(|h| Arc::ptr_eq(h, handle)) {
            inner.by_path.remove(&path);
        }
        debug!(path = ?path, "Unregistered harvester");
    }

    pub fn lookup_by_path(&self, path: &Path) -> Option<Arc<HarvesterHandle>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.by_path.get(path).cloned()
    }

    pub fn lookup_by_identity(&self, id: FileId) -> Option<Arc<HarvesterHandle>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.by_id.get(&id).cloned()
    }

    /// Move the harvester known at `from` to `to` and mark it as moved.
    ///
    /// Unknown `from` paths are ignored. If `to` already belongs to another
    /// harvester the rename is refused, keeping both indices consistent.
    pub fn rename(&self, from: &Path, to: &Path) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        let Some(handle) = inner.by_path.get(from).cloned() else {
            return false;
        };
        if from == to {
            return false;
        }
        if let Some(other) = inner.by_path.get(to) {
            if !Arc::ptr_eq(other, &handle) {
                warn!(
                    from = ?from,
                    to = ?to,
                    "Rename target is already being harvested, ignoring rename"
                );
                return false;
            }
        }

        inner.by_path.remove(from);
        handle.relabel(to.to_path_buf());
        inner.by_path.insert(to.to_path_buf(), handle);
        info!(from = ?from, to = ?to, "File renamed");
        true
    }

    /// Record `successor` as the copy-truncate successor of the harvester at `tracked`.
    pub fn set_successor(&self, tracked: &Path, successor: &Path) -> bool {
        match self.lookup_by_path(tracked) {
            Some(handle) => {
                debug!(path = ?tracked, successor = ?successor, "Recorded rotation successor");
                handle.set_successor(successor.to_path_buf());
                true
            }
            None => false,
        }
    }

    pub fn apply(&self, signal: &RotationSignal) -> bool {
        match signal {
            RotationSignal::Renamed { from, to } => self.rename(from, to),
            RotationSignal::SuccessorCreated { tracked, successor } => {
                self.set_successor(tracked, successor)
            }
        }
    }

    /// Point-in-time view of all registered harvesters, ordered by path.
    pub fn snapshot(&self) -> Vec<HarvesterInfo> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut infos: Vec<HarvesterInfo> = inner.by_id.values().map(|h| h.info()).collect();
        infos.sort_by(|a, b| a.path.cmp(&b.path));
        infos
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
