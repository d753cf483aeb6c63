// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::bounded_channel::BoundedReceiver;
use crate::receivers::file::persistence::ProgressStore;
use crate::topology::payload::EventPage;

/// Records the progress of acknowledged pages in the progress file.
pub struct Registrar {
    acked: BoundedReceiver<EventPage>,
    store: ProgressStore,
}

impl Registrar {
    pub fn new(acked: BoundedReceiver<EventPage>, store: ProgressStore) -> Self {
        Self { acked, store }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let page = select! {
                biased;

                page = self.acked.next() => match page {
                    Some(page) => page,
                    None => break,
                },
                _ = cancel.cancelled() => break,
            };
            self.record(page).await;
        }
        debug!("Registrar exiting");
    }

    async fn record(&self, page: EventPage) {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for event in &page.events {
            *counts.entry(event.source.as_str()).or_default() += 1;
        }
        info!(events = page.len(), sources = ?counts, "Registrar received events");

        let progress = page.progress();
        if progress.is_empty() {
            return;
        }

        let store = self.store.clone();
        match tokio::task::spawn_blocking(move || store.merge(progress)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(path = ?self.store.path(), error = %e, "Unable to record progress")
            }
            Err(e) => error!(error = ?e, "Progress write panicked"),
        }
    }
}
