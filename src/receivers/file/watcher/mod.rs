// SPDX-License-Identifier: Apache-2.0

//! File system watching for rotation detection.
//!
//! This module provides two watching strategies:
//! - **Native watching**: Uses OS-level file system notifications (inotify on Linux,
//!   FSEvents on macOS) for immediate event detection.
//! - **Poll watching**: Falls back to periodic directory listings for environments
//!   where native watching isn't available or reliable (e.g., NFS, network shares).
//!
//! Raw events are turned into [`RotationSignal`]s and applied to the harvester
//! registry by the [`RotationWatcher`] task.

mod consumer;
mod native;
mod poll;
mod rotation;
mod traits;

pub use consumer::RotationWatcher;
pub(crate) use consumer::run_blocking;
pub use native::NativeWatcher;
pub use poll::PollWatcher;
pub use rotation::{RotationSignal, classify, strip_rotation_suffix};
pub use traits::{FileWatcher, WatchEvent, WatchEventKind, WatcherError};

use std::time::Duration;

/// Watch mode configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WatchMode {
    /// Tries native watching first, falls back to polling on failure.
    #[default]
    Auto,
    /// Force native file system watching (inotify/FSEvents).
    /// Will fail if native watching is not supported.
    Native,
    /// Force polling mode. Use this for network file systems (NFS)
    /// or when native watching is unreliable.
    Poll,
}

impl std::str::FromStr for WatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(WatchMode::Auto),
            "native" => Ok(WatchMode::Native),
            "poll" | "polling" => Ok(WatchMode::Poll),
            _ => Err(format!(
                "Invalid watch mode '{}'. Valid options: auto, native, poll",
                s
            )),
        }
    }
}

/// Configuration for the file watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub mode: WatchMode,
    /// Directory listing interval in poll mode
    pub poll_interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            mode: WatchMode::Auto,
            poll_interval: Duration::from_millis(1000),
        }
    }
}

/// Create a watcher based on the configuration.
///
/// In `Auto` mode, this tries native watching first and falls back to polling
/// if native watching fails to initialize.
pub fn create_watcher(
    config: &WatcherConfig,
) -> Result<Box<dyn FileWatcher + Send>, WatcherError> {
    match config.mode {
        WatchMode::Native => Ok(Box::new(NativeWatcher::new()?)),
        WatchMode::Poll => Ok(Box::new(PollWatcher::new(config.poll_interval))),
        WatchMode::Auto => match NativeWatcher::new() {
            Ok(watcher) => Ok(Box::new(watcher)),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Native file watching unavailable, falling back to polling"
                );
                Ok(Box::new(PollWatcher::new(config.poll_interval)))
            }
        },
    }
}
