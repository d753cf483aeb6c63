// SPDX-License-Identifier: Apache-2.0

//! Prospectors discover the files of one file group and start harvesters.
//!
//! At startup a prospector resumes every file whose persisted identity still
//! matches what is on disk. Afterwards it expands the group's globs on an
//! interval and starts a harvester for each new file, and a rewinding one for
//! each path whose file was replaced.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bounded_channel::BoundedSender;
use crate::receivers::file::config::ProspectorConfig;
use crate::receivers::file::error::Result;
use crate::receivers::file::harvester::{HarvestOptions, HarvestTarget, HarvesterContext};
use crate::receivers::file::input::{FileFinder, FileId, STDIN_PATH};
use crate::receivers::file::join::JoinRule;
use crate::receivers::file::persistence::Progress;
use crate::topology::payload::FileEvent;

/// One `files` entry of the configuration, resolved.
#[derive(Debug, Clone, Default)]
pub struct FileGroup {
    pub paths: Vec<String>,
    pub exclude: Vec<String>,
    pub fields: BTreeMap<String, String>,
    pub join: JoinRule,
}

pub struct Prospector {
    ctx: HarvesterContext,
    finder: FileFinder,
    group: FileGroup,
    output: BoundedSender<FileEvent>,
    config: ProspectorConfig,
    known: HashMap<PathBuf, FileId>,
    /// Harvesters started by a scan that have not been seen in the registry yet.
    starting: HashMap<PathBuf, (FileId, HarvestOptions)>,
}

impl Prospector {
    pub fn new(
        ctx: HarvesterContext,
        group: FileGroup,
        output: BoundedSender<FileEvent>,
        config: ProspectorConfig,
    ) -> Result<Self> {
        let include = group
            .paths
            .iter()
            .filter(|p| p.as_str() != STDIN_PATH)
            .cloned()
            .collect();
        let finder = FileFinder::new(include, group.exclude.clone())?;

        Ok(Self {
            ctx,
            finder,
            group,
            output,
            config,
            known: HashMap::new(),
            starting: HashMap::new(),
        })
    }

    fn target(&self, path: impl Into<PathBuf>) -> HarvestTarget {
        HarvestTarget::new(path, self.output.clone())
            .with_fields(self.group.fields.clone())
            .with_join(self.group.join.clone())
    }

    pub async fn run(mut self, progress: Progress, cancel: CancellationToken) {
        if self.group.paths.iter().any(|p| p == STDIN_PATH) {
            info!("Harvesting standard input");
            self.ctx
                .spawn(self.target(STDIN_PATH), 0, HarvestOptions::default());
        }

        self.resume(&progress).await;

        let mut interval = tokio::time::interval(self.config.scan_interval);
        loop {
            select! {
                biased;

                _ = cancel.cancelled() => break,
                _ = interval.tick() => self.scan().await,
            }
        }
        debug!(paths = ?self.group.paths, "Prospector exiting");
    }

    /// Restart harvesters for persisted files that are still the same file.
    async fn resume(&mut self, progress: &Progress) {
        for (source, state) in progress {
            let path = PathBuf::from(source);
            let metadata = match tokio::fs::metadata(&path).await {
                Ok(m) => m,
                Err(e) => {
                    info!(path = ?path, error = %e, "Unable to stat persisted file, not resuming");
                    continue;
                }
            };

            let id = state.file_id();
            if !id.is_same_file(&metadata) {
                debug!(path = ?path, "Persisted file was replaced, not resuming");
                continue;
            }

            self.known.insert(path.clone(), id);
            if self.finder.matches(&path) {
                info!(path = ?path, offset = state.offset, "Resuming harvester");
                self.ctx
                    .spawn(self.target(path), state.offset, HarvestOptions::default());
            }
        }
    }

    /// Expand the globs once and start harvesters for what changed.
    pub async fn scan(&mut self) {
        let finder = self.finder.clone();
        let found = tokio::task::spawn_blocking(move || stat_all(finder.find_files())).await;
        let found = match found {
            Ok(f) => f,
            Err(e) => {
                warn!(error = ?e, "File scan panicked");
                return;
            }
        };

        let present: HashSet<PathBuf> = found.iter().map(|(p, _)| p.clone()).collect();
        self.starting.retain(|path, _| present.contains(path));

        let now = SystemTime::now();
        for (path, metadata) in found {
            if let Some(options) = self.observe(&path, &metadata, now) {
                let id = FileId::from_metadata(&metadata);
                self.starting.insert(path.clone(), (id, options));
                self.ctx.spawn(self.target(path), 0, options);
            }
        }
    }

    /// Record what is at `path` now and decide whether it needs a harvester.
    fn observe(
        &mut self,
        path: &Path,
        metadata: &Metadata,
        now: SystemTime,
    ) -> Option<HarvestOptions> {
        let id = FileId::from_metadata(metadata);

        match self.known.insert(path.to_path_buf(), id) {
            None => {
                if self.is_stale(metadata, now) {
                    info!(path = ?path, "Skipping old file");
                    None
                } else if self.is_tracked_elsewhere(path, id) {
                    debug!(path = ?path, "File is a renamed known file");
                    None
                } else {
                    info!(path = ?path, "Harvesting new file");
                    Some(HarvestOptions::default())
                }
            }
            Some(previous) if previous != id => {
                info!(path = ?path, "Harvesting rotated file");
                Some(HarvestOptions::rewind())
            }
            Some(_) => self.retry_unstarted(path, id),
        }
    }

    fn is_tracked_elsewhere(&self, path: &Path, id: FileId) -> bool {
        self.known.iter().any(|(p, known)| p != path && *known == id)
            || self.ctx.registry().lookup_by_identity(id).is_some()
    }

    /// A harvester refuses to start while the path is still registered to the
    /// harvester of the file that was rotated away. Start it again once the
    /// rename has been applied.
    fn retry_unstarted(&mut self, path: &Path, id: FileId) -> Option<HarvestOptions> {
        let (started_id, options) = *self.starting.get(path)?;
        if started_id != id {
            self.starting.remove(path);
            return None;
        }

        match self.ctx.registry().lookup_by_path(path) {
            Some(handle) if handle.file_id() == Some(id) => {
                self.starting.remove(path);
                None
            }
            Some(_) => {
                debug!(path = ?path, "Path is still held by the rotated file's harvester");
                None
            }
            None => {
                info!(path = ?path, "Harvester did not start, retrying");
                Some(options)
            }
        }
    }

    fn is_stale(&self, metadata: &Metadata, now: SystemTime) -> bool {
        metadata
            .modified()
            .ok()
            .and_then(|mtime| now.duration_since(mtime).ok())
            .is_some_and(|age| age > self.config.stale_after)
    }
}

fn stat_all(paths: Vec<PathBuf>) -> Vec<(PathBuf, Metadata)> {
    paths
        .into_iter()
        .filter_map(|path| match std::fs::metadata(&path) {
            Ok(m) => Some((path, m)),
            Err(e) => {
                warn!(path = ?path, error = %e, "Unable to stat file");
                None
            }
        })
        .collect()
}
