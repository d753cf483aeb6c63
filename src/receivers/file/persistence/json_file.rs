// SPDX-License-Identifier: Apache-2.0

//! JSON file-based progress store with atomic writes.
//!
//! Every merge loads the current file, overlays the new entries by path and
//! writes the result to a temp file in the same directory, which is then
//! renamed over the destination.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::receivers::file::error::{Error, Result};

use super::schema::Progress;

/// Handle to the progress file. Cloning shares the same write lock.
#[derive(Clone, Debug)]
pub struct ProgressStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl ProgressStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored progress. A missing file is empty progress.
    pub fn load(&self) -> Result<Progress> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Progress::new()),
            Err(e) => {
                return Err(Error::Persistence(format!(
                    "failed to open progress file {:?}: {}",
                    self.path, e
                )));
            }
        };

        serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            Error::Persistence(format!(
                "failed to parse progress file {:?}: {}",
                self.path, e
            ))
        })
    }

    /// Overlay `updates` onto the stored progress and write it back atomically.
    ///
    /// Entries for paths not present in `updates` are kept as they are. A
    /// corrupt progress file is reported and left untouched.
    pub fn merge(&self, updates: Progress) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| Error::Persistence(format!("progress lock poisoned: {}", e)))?;

        let mut progress = self.load()?;
        progress.extend(updates);
        atomic_write(&self.path, &progress)
    }
}

/// Write progress to file atomically (write to temp, then rename)
fn atomic_write(path: &Path, progress: &Progress) -> Result<()> {
    use portable_atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Persistence(format!("failed to create parent directory: {}", e))
            })?;
        }
    }

    // The temp file must live next to the destination so the rename stays on
    // one filesystem
    let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let temp_path = path.with_extension(format!("tmp.{}.{}", std::process::id(), unique_id));

    let result = write_temp(&temp_path, progress).and_then(|_| {
        fs::rename(&temp_path, path)
            .map_err(|e| Error::Persistence(format!("failed to rename progress file: {}", e)))
    });

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn write_temp(temp_path: &Path, progress: &Progress) -> Result<()> {
    let file = File::create(temp_path)
        .map_err(|e| Error::Persistence(format!("failed to create temp file: {}", e)))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, progress)
        .map_err(|e| Error::Persistence(format!("failed to write progress: {}", e)))?;

    writer
        .flush()
        .map_err(|e| Error::Persistence(format!("failed to flush progress: {}", e)))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| Error::Persistence(format!("failed to sync progress: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receivers::file::persistence::FileState;
    use tempfile::TempDir;

    fn state(source: &str, offset: u64) -> FileState {
        FileState {
            source: source.to_string(),
            offset,
            inode: 11,
            device: 2,
        }
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = ProgressStore::new(dir.path().join("progress.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_merge_keeps_other_paths() {
        let dir = TempDir::new().unwrap();
        let store = ProgressStore::new(dir.path().join("progress.json"));

        let mut first = Progress::new();
        first.insert("A".into(), state("A", 10));
        first.insert("B".into(), state("B", 20));
        store.merge(first).unwrap();

        let mut second = Progress::new();
        second.insert("A".into(), state("A", 50));
        store.merge(second).unwrap();

        let progress = store.load().unwrap();
        assert_eq!(progress.len(), 2);
        assert_eq!(progress["A"].offset, 50);
        assert_eq!(progress["B"].offset, 20);
    }

    #[test]
    fn test_merge_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = ProgressStore::new(dir.path().join("progress.json"));

        let mut update = Progress::new();
        update.insert("A".into(), state("A", 1));
        store.merge(update.clone()).unwrap();
        store.merge(update).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("progress.json")]);
    }

    #[test]
    fn test_merge_creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let store = ProgressStore::new(dir.path().join("state").join("progress.json"));

        let mut update = Progress::new();
        update.insert("A".into(), state("A", 5));
        store.merge(update).unwrap();

        assert_eq!(store.load().unwrap()["A"].offset, 5);
    }

    #[test]
    fn test_corrupt_file_is_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        fs::write(&path, b"{not json").unwrap();
        let store = ProgressStore::new(&path);

        let mut update = Progress::new();
        update.insert("A".into(), state("A", 5));
        assert!(matches!(store.merge(update), Err(Error::Persistence(_))));
        assert_eq!(fs::read(&path).unwrap(), b"{not json");
    }
}
