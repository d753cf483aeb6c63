// SPDX-License-Identifier: Apache-2.0

use std::error::Error;
use std::time::Duration;
use tokio::select;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::bounded_channel::{BoundedReceiver, BoundedSender, SendError};
use crate::topology::payload::{EventPage, FileEvent};

#[derive(Clone, Debug)]
pub struct SpoolConfig {
    pub max_size: usize,
    pub idle_timeout: Duration,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            max_size: 1024,
            idle_timeout: Duration::from_secs(5),
        }
    }
}

/// Events waiting to become a page.
pub(crate) struct Spool {
    events: Vec<FileEvent>,
    max_size: usize,
    last_flush: Instant,
    idle_timeout: Duration,
}

impl Spool {
    pub(crate) fn new(max_size: usize, idle_timeout: Duration) -> Self {
        let max_size = max_size.max(1);
        Self {
            events: Vec::with_capacity(max_size),
            max_size,
            last_flush: Instant::now(),
            idle_timeout,
        }
    }

    /// Add an event, returning a full page once `max_size` is reached.
    pub(crate) fn offer(&mut self, event: FileEvent) -> Option<EventPage> {
        self.events.push(event);
        if self.events.len() >= self.max_size {
            return Some(self.take_page());
        }
        None
    }

    pub(crate) fn should_flush(&self, now: Instant) -> bool {
        !self.events.is_empty() && self.last_flush + self.idle_timeout <= now
    }

    pub(crate) fn take_page(&mut self) -> EventPage {
        let events = std::mem::replace(&mut self.events, Vec::with_capacity(self.max_size));
        self.last_flush = Instant::now();
        EventPage::new(events)
    }
}

/// Collects harvested events into pages for the publishers of one network
/// group.
pub struct Spooler {
    receiver: BoundedReceiver<FileEvent>,
    sender: BoundedSender<EventPage>,
    config: SpoolConfig,
}

impl Spooler {
    pub fn new(
        receiver: BoundedReceiver<FileEvent>,
        sender: BoundedSender<EventPage>,
        config: SpoolConfig,
    ) -> Self {
        Self {
            receiver,
            sender,
            config,
        }
    }

    pub async fn start(
        mut self,
        cancel: CancellationToken,
    ) -> Result<(), Box<dyn Error + Send + Sync + 'static>> {
        let mut spool = Spool::new(self.config.max_size, self.config.idle_timeout);
        let tick = (self.config.idle_timeout / 2).max(Duration::from_millis(1));
        let mut flush_timer = tokio::time::interval(tick);

        loop {
            select! {
                biased;

                _ = flush_timer.tick() => {
                    if spool.should_flush(Instant::now()) {
                        let page = spool.take_page();
                        debug!(page_size = page.len(), "Flushing idle spool");
                        if self.send_page(page, &cancel).await.is_err() {
                            return Ok(());
                        }
                    }
                },

                event = self.receiver.next() => {
                    let Some(event) = event else {
                        debug!("Spooler input closed, flushing and exiting");
                        let page = spool.take_page();
                        if !page.is_empty() {
                            let _ = self.send_page(page, &cancel).await;
                        }
                        return Ok(());
                    };

                    if let Some(page) = spool.offer(event) {
                        debug!(page_size = page.len(), "Flushing full spool");
                        if self.send_page(page, &cancel).await.is_err() {
                            return Ok(());
                        }
                    }
                },

                _ = cancel.cancelled() => {
                    debug!("Spooler received shutdown signal, exiting");
                    return Ok(());
                }
            }
        }
    }

    // waits for a publisher to take the page; never drops it unless shutting down
    async fn send_page(&self, page: EventPage, cancel: &CancellationToken) -> Result<(), ()> {
        select! {
            res = self.sender.send(page) => match res {
                Ok(()) => Ok(()),
                Err(SendError::Disconnected) => {
                    error!("Publishers are gone, spooler exiting");
                    Err(())
                }
            },
            _ = cancel.cancelled() => {
                debug!("Spooler received shutdown signal while sending a page");
                Err(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded_channel::bounded;
    use crate::topology::payload::test::event;
    use tokio::time::timeout;

    fn spooler(
        max_size: usize,
        idle_timeout: Duration,
        page_queue: usize,
    ) -> (
        BoundedSender<FileEvent>,
        BoundedReceiver<EventPage>,
        tokio::task::JoinHandle<()>,
        CancellationToken,
    ) {
        let (event_tx, event_rx) = bounded(16);
        let (page_tx, page_rx) = bounded(page_queue);
        let cancel = CancellationToken::new();
        let spooler = Spooler::new(
            event_rx,
            page_tx,
            SpoolConfig {
                max_size,
                idle_timeout,
            },
        );
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            spooler.start(token).await.unwrap();
        });
        (event_tx, page_rx, task, cancel)
    }

    #[test]
    fn test_spool_flushes_at_max_size() {
        let mut spool = Spool::new(2, Duration::from_secs(5));
        assert!(spool.offer(event("/tmp/a.log", 0, "one")).is_none());
        let page = spool.offer(event("/tmp/a.log", 4, "two")).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page.events[0].offset, 0);
        assert_eq!(page.events[1].offset, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spool_never_flushes_empty() {
        let spool = Spool::new(2, Duration::from_millis(10));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!spool.should_flush(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_flush() {
        let idle = Duration::from_secs(5);
        let (tx, mut pages, _task, cancel) = spooler(100, idle, 1);
        let start = Instant::now();

        tx.send(event("/tmp/a.log", 0, "one")).await.unwrap();
        tx.send(event("/tmp/a.log", 4, "two")).await.unwrap();

        let page = pages.next().await.unwrap();
        assert_eq!(page.len(), 2);
        assert!(start.elapsed() >= idle);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_page_flushes_before_idle() {
        let idle = Duration::from_secs(60);
        let (tx, mut pages, _task, cancel) = spooler(3, idle, 1);
        let start = Instant::now();

        for i in 0..3 {
            tx.send(event("/tmp/a.log", i * 4, "abc")).await.unwrap();
        }
        let page = pages.next().await.unwrap();
        assert_eq!(page.len(), 3);
        assert!(start.elapsed() < idle);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocks_instead_of_dropping() {
        let (tx, mut pages, _task, cancel) = spooler(1, Duration::from_secs(5), 1);

        for i in 0..4 {
            tx.send(event("/tmp/a.log", i * 4, "abc")).await.unwrap();
        }

        for i in 0..4 {
            let page = timeout(Duration::from_secs(1), pages.next()).await.unwrap().unwrap();
            assert_eq!(page.events[0].offset, i * 4);
        }
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_input_flushes_remainder() {
        let (tx, mut pages, task, _cancel) = spooler(100, Duration::from_secs(60), 1);

        tx.send(event("/tmp/a.log", 0, "last")).await.unwrap();
        drop(tx);

        let page = pages.next().await.unwrap();
        assert_eq!(page.len(), 1);
        task.await.unwrap();
    }
}
