// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::select;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::{BoundedReceiver, BoundedSender};
use crate::exporters::lumberjack::codec::{self, ACK_LEN, Payload};
use crate::exporters::lumberjack::{Backoff, Connector, ExporterError};
use crate::topology::payload::EventPage;

#[derive(Clone, Debug)]
pub struct PublisherConfig {
    /// Deadline for connecting, for writing a payload and for reading its ack.
    pub timeout: Duration,
    pub backoff: Backoff,
    /// Value of the `host` key of every event.
    pub host: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            backoff: Backoff::default(),
            host: gethostname::gethostname().to_string_lossy().into_owned(),
        }
    }
}

/// Delivers pages to one aggregator. Publishers of the same network group
/// share the page queue and compete for pages.
pub struct Publisher<C: Connector> {
    id: usize,
    server: String,
    connector: C,
    config: PublisherConfig,
    pages: BoundedReceiver<EventPage>,
    acked: BoundedSender<EventPage>,
    sequence: u32,
}

impl<C: Connector> Publisher<C> {
    pub fn new(
        id: usize,
        server: impl Into<String>,
        connector: C,
        config: PublisherConfig,
        pages: BoundedReceiver<EventPage>,
        acked: BoundedSender<EventPage>,
    ) -> Self {
        Self {
            id,
            server: server.into(),
            connector,
            config,
            pages,
            acked,
            sequence: 0,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut conn: Option<C::Stream> = None;

        loop {
            let page = select! {
                biased;

                _ = cancel.cancelled() => break,
                page = self.pages.next() => match page {
                    Some(page) => page,
                    None => break,
                },
            };
            if page.is_empty() {
                continue;
            }

            let payload = match codec::encode_page(&page, self.sequence, &self.config.host) {
                Ok(p) => p,
                Err(e) => {
                    error!(
                        publisher = self.id,
                        server = %self.server,
                        events = page.len(),
                        error = %e,
                        "Unable to compress page, its events are lost"
                    );
                    continue;
                }
            };
            self.sequence = self.sequence.wrapping_add(payload.events());

            // The same payload is resent until it is acknowledged
            loop {
                let mut stream = match conn.take() {
                    Some(s) => s,
                    None => match self.connect(&cancel).await {
                        Some(s) => s,
                        None => return,
                    },
                };

                let res = select! {
                    biased;

                    _ = cancel.cancelled() => return,
                    res = self.send(&mut stream, &payload) => res,
                };
                match res {
                    Ok(()) => {
                        conn = Some(stream);
                        break;
                    }
                    Err(e) => {
                        let delay = self.config.backoff.next_delay();
                        warn!(
                            publisher = self.id,
                            server = %self.server,
                            error = %e,
                            delay = ?delay,
                            "Socket error, page will be resent after reconnecting"
                        );
                        if !self.sleep(delay, &cancel).await {
                            return;
                        }
                    }
                }
            }

            info!(
                publisher = self.id,
                server = %self.server,
                events = page.len(),
                "Page acknowledged"
            );
            if self.acked.send(page).await.is_err() {
                debug!(publisher = self.id, "Registrar is gone, publisher exiting");
                break;
            }
        }
        debug!(publisher = self.id, server = %self.server, "Publisher exiting");
    }

    /// Connect, retrying with backoff. Only gives up when cancelled.
    async fn connect(&self, cancel: &CancellationToken) -> Option<C::Stream> {
        loop {
            let err = select! {
                biased;

                _ = cancel.cancelled() => return None,
                res = timeout(self.config.timeout, self.connector.connect(&self.server)) => match res {
                    Ok(Ok(stream)) => {
                        info!(publisher = self.id, server = %self.server, "Publisher connected");
                        return Some(stream);
                    }
                    Ok(Err(e)) => e,
                    Err(_) => ExporterError::Timeout("connecting"),
                },
            };

            let delay = self.config.backoff.next_delay();
            warn!(
                publisher = self.id,
                server = %self.server,
                error = %err,
                delay = ?delay,
                "Failed to connect, retrying"
            );
            if !self.sleep(delay, cancel).await {
                return None;
            }
        }
    }

    async fn send(&self, stream: &mut C::Stream, payload: &Payload) -> Result<(), ExporterError> {
        let deadline = self.config.timeout;

        timeout(deadline, async {
            stream.write_all(payload.as_bytes()).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| ExporterError::Timeout("writing payload"))??;

        // the ack contents are not checked, only that a full ack arrived
        let mut ack = [0u8; ACK_LEN];
        timeout(deadline, stream.read_exact(&mut ack))
            .await
            .map_err(|_| ExporterError::Timeout("waiting for ack"))??;
        Ok(())
    }

    async fn sleep(&self, delay: Duration, cancel: &CancellationToken) -> bool {
        select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
