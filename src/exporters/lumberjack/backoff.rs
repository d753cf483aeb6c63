// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Reconnect delay: a fixed base plus a random jitter.
#[derive(Clone, Debug)]
pub struct Backoff {
    pub base: Duration,
    pub jitter: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            jitter: Duration::from_secs(10),
        }
    }
}

impl Backoff {
    pub fn next_delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.base;
        }
        self.base + Duration::from_millis(rand::random_range(0..jitter_ms))
    }
}
