// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::rotation::classify;
use super::traits::FileWatcher;
use crate::bounded_channel::BoundedReceiver;
use crate::receivers::file::registry::Registry;

const RECV_TIMEOUT: Duration = Duration::from_millis(250);

/// Consumes file system events and applies the resulting rotation signals to
/// the registry. Directories to watch are requested by harvesters as they start.
///
/// The underlying watchers block, so [`RotationWatcher::run`] is meant for a
/// blocking thread.
pub struct RotationWatcher {
    watcher: Box<dyn FileWatcher + Send>,
    registry: Arc<Registry>,
    requests: BoundedReceiver<PathBuf>,
    watched: HashSet<PathBuf>,
}

impl RotationWatcher {
    pub fn new(
        watcher: Box<dyn FileWatcher + Send>,
        registry: Arc<Registry>,
        requests: BoundedReceiver<PathBuf>,
    ) -> Self {
        Self {
            watcher,
            registry,
            requests,
            watched: HashSet::new(),
        }
    }

    pub fn run(mut self, cancel: CancellationToken) {
        info!(backend = self.watcher.backend_name(), "Rotation watcher started");

        while !cancel.is_cancelled() {
            while let Some(dir) = self.requests.try_recv() {
                self.watch_dir(dir);
            }

            let events = match self.watcher.recv_timeout(RECV_TIMEOUT) {
                Ok(events) => events,
                Err(e) => {
                    warn!(error = %e, "Watcher error");
                    std::thread::sleep(RECV_TIMEOUT);
                    continue;
                }
            };
            for event in events {
                for signal in classify(&event, &self.registry) {
                    debug!(signal = ?signal, "Applying rotation signal");
                    self.registry.apply(&signal);
                }
            }
        }

        debug!("Rotation watcher exiting");
    }

    fn watch_dir(&mut self, dir: PathBuf) {
        if self.watched.contains(&dir) {
            return;
        }
        match self.watcher.watch(&dir) {
            Ok(()) => {
                debug!(path = ?dir, "Watching directory");
                self.watched.insert(dir);
            }
            Err(e) => warn!(path = ?dir, error = %e, "Unable to watch directory"),
        }
    }
}

/// Run the watcher on a blocking thread.
pub(crate) async fn run_blocking(watcher: RotationWatcher, cancel: CancellationToken) {
    if let Err(e) = tokio::task::spawn_blocking(move || watcher.run(cancel)).await {
        error!(error = ?e, "Rotation watcher task panicked");
    }
}
