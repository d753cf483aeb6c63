// SPDX-License-Identifier: Apache-2.0

//! Harvesters read one file each and turn its lines into [`FileEvent`]s.
//!
//! A harvester follows its file by handle, not by path: renames do not
//! interrupt it, a truncation rewinds it, and it keeps draining a deleted file
//! until nothing is left. Harvesters run as detached tasks and stop on their
//! own when the file goes idle, is gone, or cannot be read.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::bounded_channel::BoundedSender;
use crate::receivers::file::config::{HarvesterConfig, StartAt};
use crate::receivers::file::error::{Error, Result};
use crate::receivers::file::input::{FileReader, FileStatus, STDIN_PATH, TailFingerprint};
use crate::receivers::file::join::{JoinRule, JoinedLine, LineJoiner};
use crate::receivers::file::registry::{HarvesterHandle, Registry};
use crate::topology::payload::{FileEvent, ROTATED_FIELD};

/// Per-request harvest options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HarvestOptions {
    /// Read from the start of the file when no offset is given, regardless of
    /// the configured start position.
    pub rewind: bool,
}

impl HarvestOptions {
    pub fn rewind() -> Self {
        Self { rewind: true }
    }
}

/// A file to harvest and the destination of its events.
#[derive(Clone)]
pub struct HarvestTarget {
    pub path: PathBuf,
    pub fields: BTreeMap<String, String>,
    pub join: JoinRule,
    pub output: BoundedSender<FileEvent>,
}

impl HarvestTarget {
    pub fn new(path: impl Into<PathBuf>, output: BoundedSender<FileEvent>) -> Self {
        Self {
            path: path.into(),
            fields: BTreeMap::new(),
            join: JoinRule::None,
            output,
        }
    }

    pub fn with_fields(mut self, fields: BTreeMap<String, String>) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_join(mut self, join: JoinRule) -> Self {
        self.join = join;
        self
    }

    fn is_stdin(&self) -> bool {
        self.path.as_os_str() == STDIN_PATH
    }
}

/// Everything harvesters share: the registry, their tunables and the queue
/// used to ask the rotation watcher to watch a directory.
#[derive(Clone)]
pub struct HarvesterContext {
    registry: Arc<Registry>,
    config: Arc<HarvesterConfig>,
    watch_requests: Option<BoundedSender<PathBuf>>,
}

impl HarvesterContext {
    pub fn new(
        registry: Arc<Registry>,
        config: HarvesterConfig,
        watch_requests: Option<BoundedSender<PathBuf>>,
    ) -> Self {
        Self {
            registry,
            config: Arc::new(config),
            watch_requests,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &HarvesterConfig {
        &self.config
    }

    /// Start a harvester task. The task is detached; the handle is only useful
    /// to tests that want to wait for it.
    pub fn spawn(
        &self,
        target: HarvestTarget,
        offset: u64,
        options: HarvestOptions,
    ) -> JoinHandle<()> {
        tokio::spawn(harvest(self.clone(), target, offset, options))
    }

    /// Start a harvester on a copy-truncate successor, continuing right after
    /// the fingerprinted line.
    pub fn spawn_resume(
        &self,
        target: HarvestTarget,
        fingerprint: TailFingerprint,
    ) -> JoinHandle<()> {
        tokio::spawn(resume(self.clone(), target, fingerprint))
    }

    async fn request_watch(&self, path: &Path) {
        let (Some(requests), Some(dir)) = (&self.watch_requests, path.parent()) else {
            return;
        };
        let dir = if dir.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            dir.to_path_buf()
        };
        if requests.send(dir).await.is_err() {
            debug!(path = ?path, "Rotation watcher is gone, not watching directory");
        }
    }

    /// Open `path`, retrying until it succeeds.
    async fn open(&self, path: &Path) -> FileReader {
        loop {
            match FileReader::open(path).await {
                Ok(reader) => return reader,
                Err(e) => {
                    warn!(path = ?path, error = %e, "Failed to open file, retrying");
                    sleep(self.config.open_retry_delay).await;
                }
            }
        }
    }
}

/// Harvest `target.path` starting at `offset`.
///
/// A zero offset means "no recorded position": the configured start position
/// applies, unless `options.rewind` asks for the beginning of the file.
pub async fn harvest(
    ctx: HarvesterContext,
    target: HarvestTarget,
    offset: u64,
    options: HarvestOptions,
) {
    if !target.is_stdin() {
        ctx.request_watch(&target.path).await;
    }
    info!(path = ?target.path, "Starting harvester");

    let mut reader = ctx.open(&target.path).await;
    let position = if reader.is_stdin() {
        Ok(0)
    } else if offset > 0 {
        info!(path = ?target.path, offset, "Reading from recorded offset");
        reader.seek(SeekFrom::Start(offset)).await
    } else if ctx.config.start_at == StartAt::Beginning || options.rewind {
        info!(path = ?target.path, "Reading from beginning");
        reader.seek(SeekFrom::Start(0)).await
    } else {
        info!(path = ?target.path, "Reading from end");
        reader.seek(SeekFrom::End(0)).await
    };

    let offset = match position {
        Ok(o) => o,
        Err(e) => {
            warn!(path = ?target.path, error = %e, "Unable to position file, stopping harvester");
            return;
        }
    };

    run(ctx, target, reader, offset).await;
}

/// Continue a copy-truncate successor after the line its predecessor read last.
async fn resume(ctx: HarvesterContext, target: HarvestTarget, fingerprint: TailFingerprint) {
    if target.is_stdin() {
        warn!(offset = fingerprint.end_offset(), "Refusing to resume standard input");
        return;
    }
    info!(path = ?target.path, offset = fingerprint.end_offset(), "Trying to resume rotated file");

    let mut reader = ctx.open(&target.path).await;
    match reader.resume_at(&fingerprint).await {
        Ok(true) => {}
        Ok(false) => {
            info!(
                path = ?target.path,
                "Rotated file does not continue where the original stopped, skipping"
            );
            return;
        }
        Err(e) => {
            warn!(path = ?target.path, error = %e, "Unable to read resume line");
            return;
        }
    }

    run(ctx, target, reader, fingerprint.end_offset()).await;
}

async fn run(ctx: HarvesterContext, target: HarvestTarget, reader: FileReader, offset: u64) {
    let file_id = match reader.file_id().await {
        Ok(id) => id,
        Err(e) => {
            warn!(path = ?target.path, error = %e, "Unable to stat file, stopping harvester");
            return;
        }
    };

    let handle = Arc::new(HarvesterHandle::new(
        target.path.clone(),
        file_id,
        target.fields.clone(),
    ));
    if file_id.is_some() {
        if let Err(e) = ctx.registry.register(handle.clone()) {
            info!(path = ?target.path, error = %e, "Not starting harvester");
            return;
        }
    }

    let mut harvester = Harvester {
        joiner: LineJoiner::new(target.join.clone()),
        ctx,
        target,
        handle,
        reader,
        offset,
    };

    if let Err(e) = harvester.read_lines().await {
        warn!(
            path = ?harvester.handle.path(),
            offset = harvester.offset,
            error = %e,
            "Harvester stopping"
        );
    }
    if let Some(pending) = harvester.joiner.flush() {
        if let Err(e) = harvester.send(pending).await {
            debug!(
                path = ?harvester.handle.path(),
                error = %e,
                "Unable to send pending joined line"
            );
        }
    }
    if file_id.is_some() {
        harvester.ctx.registry.unregister(&harvester.handle);
    }
    info!(path = ?harvester.handle.path(), "Harvester done reading file");
}

struct Harvester {
    ctx: HarvesterContext,
    target: HarvestTarget,
    handle: Arc<HarvesterHandle>,
    reader: FileReader,
    joiner: LineJoiner,
    offset: u64,
}

impl Harvester {
    /// Read until the file is idle, gone or broken. `Ok` is a normal stop.
    async fn read_lines(&mut self) -> Result<()> {
        let config = self.ctx.config.clone();
        let mut buf = Vec::with_capacity(4096);
        let mut last_line: Vec<u8> = Vec::new();
        let mut last_data = Instant::now();

        loop {
            buf.clear();
            let n = self.reader.read_line(&mut buf).await?;

            if n > 0 {
                last_data = Instant::now();
                last_line.clear();
                last_line.extend_from_slice(&buf);

                let partial = buf.last() != Some(&b'\n');
                if let Some(record) = self.joiner.push(&buf, self.offset) {
                    self.send(record).await?;
                }
                self.offset += n as u64;

                if partial {
                    debug!(
                        path = ?self.target.path,
                        offset = self.offset,
                        "Emitted partial line at EOF"
                    );
                    sleep(config.partial_line_delay).await;
                }
                continue;
            }

            if !self.reader.is_stdin() {
                match self.reader.status(self.offset).await? {
                    FileStatus::Active => {}
                    FileStatus::Truncated { size } => {
                        info!(
                            path = ?self.handle.path(),
                            offset = self.offset,
                            size,
                            "File was truncated, rewinding"
                        );
                        self.rewind(&last_line).await?;
                        last_data = Instant::now();
                        continue;
                    }
                    FileStatus::Removed => {
                        info!(path = ?self.handle.path(), "File was removed and fully read");
                        return Ok(());
                    }
                }
            }

            if last_data.elapsed() >= config.idle_timeout {
                info!(path = ?self.handle.path(), "Harvester timed out");
                return Ok(());
            }
            sleep(config.eof_poll_interval).await;
        }
    }

    /// Hand the pre-truncation position to a successor, if one was seen, and
    /// start over at the beginning of the file.
    async fn rewind(&mut self, last_line: &[u8]) -> Result<()> {
        if let Some(pending) = self.joiner.flush() {
            self.send(pending).await?;
        }

        if let Some(successor) = self.handle.take_successor() {
            info!(
                path = ?self.handle.path(),
                successor = ?successor,
                offset = self.offset,
                "Continuing rotated content in successor"
            );
            let target = HarvestTarget {
                path: successor,
                ..self.target.clone()
            };
            self.ctx
                .spawn_resume(target, TailFingerprint::new(last_line.to_vec(), self.offset));
        }

        self.reader.seek(SeekFrom::Start(0)).await?;
        self.offset = 0;
        Ok(())
    }

    async fn send(&self, record: JoinedLine) -> Result<()> {
        let event = self.event(record);
        self.target
            .output
            .send(event)
            .await
            .map_err(|_| Error::ChannelClosed)
    }

    fn event(&self, record: JoinedLine) -> FileEvent {
        let JoinedLine { mut raw, offset } = record;
        let consumed = raw.len() as u64;
        if raw.last() == Some(&b'\n') {
            raw.pop();
        }

        let rotated = self.handle.moved();
        let mut fields = self.target.fields.clone();
        fields.insert(ROTATED_FIELD.to_string(), rotated.to_string());

        FileEvent {
            source: self.handle.path().to_string_lossy().into_owned(),
            offset,
            text: Bytes::from(raw),
            consumed,
            fields,
            rotated,
            file_id: self.handle.file_id(),
        }
    }
}
