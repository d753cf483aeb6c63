// SPDX-License-Identifier: Apache-2.0

//! Bounded queues between pipeline stages.
//!
//! A full queue blocks the producer, which is how back pressure travels from
//! a slow aggregator all the way back to the harvesters. Receivers can be
//! cloned; clones compete for items, each item is delivered once.

use flume::{Receiver, Sender};
use thiserror::Error;

pub struct BoundedSender<T> {
    tx: Sender<T>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("channel disconnected")]
    Disconnected,
}

impl<T> BoundedSender<T> {
    /// Wait for room in the queue. Fails once every receiver is gone.
    pub async fn send(&self, item: T) -> Result<(), SendError> {
        self.tx
            .send_async(item)
            .await
            .map_err(|_| SendError::Disconnected)
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

impl<T> Clone for BoundedSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

#[derive(Clone)]
pub struct BoundedReceiver<T> {
    rx: Receiver<T>,
}

impl<T> BoundedReceiver<T> {
    /// The next item, or `None` once the queue is drained and every sender
    /// is gone.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv_async().await.ok()
    }

    /// Returns immediately; `None` when nothing is queued.
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

pub fn bounded<T>(size: usize) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (tx, rx) = flume::bounded::<T>(size);
    (BoundedSender { tx }, BoundedReceiver { rx })
}
