// SPDX-License-Identifier: Apache-2.0

//! Runtime tunables for harvesters and prospectors.

use std::time::Duration;

/// Where to start reading a file that has no recorded progress
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartAt {
    /// Start reading from the beginning of the file
    Beginning,
    /// Start reading from the end of the file (only new content)
    #[default]
    End,
}

/// Configuration shared by every harvester of the process
#[derive(Debug, Clone)]
pub struct HarvesterConfig {
    /// Start position for fresh files without a rewind request
    pub start_at: StartAt,
    /// Stop harvesting after this long without new data
    pub idle_timeout: Duration,
    /// Delay between attempts to open a file that cannot be opened
    pub open_retry_delay: Duration,
    /// Sleep between checks once the reader is at EOF
    pub eof_poll_interval: Duration,
    /// Pause after emitting a line that had no trailing newline
    pub partial_line_delay: Duration,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            start_at: StartAt::End,
            idle_timeout: Duration::from_secs(24 * 60 * 60),
            open_retry_delay: Duration::from_secs(5),
            eof_poll_interval: Duration::from_secs(1),
            partial_line_delay: Duration::from_secs(1),
        }
    }
}

/// Configuration for a prospector
#[derive(Debug, Clone)]
pub struct ProspectorConfig {
    /// How often the file group's globs are expanded
    pub scan_interval: Duration,
    /// Newly found files not modified within this window are left alone
    pub stale_after: Duration,
}

impl Default for ProspectorConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(10),
            stale_after: Duration::from_secs(24 * 60 * 60),
        }
    }
}
