// SPDX-License-Identifier: Apache-2.0

use clap::{Args, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::receivers::file::config::{HarvesterConfig, ProspectorConfig, StartAt};
use crate::receivers::file::watcher::{WatchMode, WatcherConfig};
use crate::topology::spooler::SpoolConfig;

/// Watch mode for rotation detection
#[derive(Copy, Clone, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum WatchModeArg {
    /// Native file system notifications, polling when they are unavailable
    #[default]
    Auto,
    /// Force native file system watching (inotify/kqueue/FSEvents)
    Native,
    /// Force polling mode (use for NFS or when native watching is unreliable)
    Poll,
}

impl From<WatchModeArg> for WatchMode {
    fn from(w: WatchModeArg) -> Self {
        match w {
            WatchModeArg::Auto => WatchMode::Auto,
            WatchModeArg::Native => WatchMode::Native,
            WatchModeArg::Poll => WatchMode::Poll,
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct AgentRun {
    /// Path to the JSON configuration file
    #[arg(long, env = "LOGSHIP_CONFIG")]
    pub config: PathBuf,

    /// Maximum number of events in one page
    #[arg(long, env = "LOGSHIP_SPOOL_SIZE", default_value = "1024")]
    pub spool_size: usize,

    /// Flush a partial page after this many milliseconds without a flush
    #[arg(long, env = "LOGSHIP_IDLE_FLUSH_TIME_MS", default_value = "5000")]
    pub idle_flush_time_ms: u64,

    /// Read new files from the beginning instead of the end
    #[arg(long, env = "LOGSHIP_FROM_BEGINNING", default_value = "false")]
    pub from_beginning: bool,

    /// Where delivery progress is recorded
    #[arg(
        long,
        env = "LOGSHIP_PROGRESS_FILE",
        default_value = ".logship-progress.json"
    )]
    pub progress_file: PathBuf,

    /// Stop harvesting a file after this many seconds without new data
    #[arg(long, env = "LOGSHIP_HARVESTER_IDLE_TIMEOUT_SECS", default_value = "86400")]
    pub harvester_idle_timeout_secs: u64,

    /// Interval between glob scans of each file group
    #[arg(long, env = "LOGSHIP_SCAN_INTERVAL_SECS", default_value = "10")]
    pub scan_interval_secs: u64,

    /// Newly found files not modified for this many seconds are ignored
    #[arg(long, env = "LOGSHIP_STALE_AFTER_SECS", default_value = "86400")]
    pub stale_after_secs: u64,

    /// Watch mode for rotation detection
    #[arg(value_enum, long, env = "LOGSHIP_WATCH_MODE", default_value = "auto")]
    pub watch_mode: WatchModeArg,

    /// Directory listing interval when polling
    #[arg(long, env = "LOGSHIP_WATCH_POLL_INTERVAL_MS", default_value = "1000")]
    pub watch_poll_interval_ms: u64,

    /// How long the publishers get to deliver in-flight pages on shutdown
    #[arg(long, env = "LOGSHIP_SHUTDOWN_TIMEOUT_MS", default_value = "3000")]
    pub shutdown_timeout_ms: u64,
}

impl AgentRun {
    pub fn harvester_config(&self) -> HarvesterConfig {
        HarvesterConfig {
            start_at: if self.from_beginning {
                StartAt::Beginning
            } else {
                StartAt::End
            },
            idle_timeout: Duration::from_secs(self.harvester_idle_timeout_secs),
            ..Default::default()
        }
    }

    pub fn prospector_config(&self) -> ProspectorConfig {
        ProspectorConfig {
            scan_interval: Duration::from_secs(self.scan_interval_secs),
            stale_after: Duration::from_secs(self.stale_after_secs),
        }
    }

    pub fn spool_config(&self) -> SpoolConfig {
        SpoolConfig {
            max_size: self.spool_size.max(1),
            idle_timeout: Duration::from_millis(self.idle_flush_time_ms),
        }
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            mode: self.watch_mode.into(),
            poll_interval: Duration::from_millis(self.watch_poll_interval_ms),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for AgentRun {
    fn default() -> Self {
        AgentRun {
            config: PathBuf::from("logship.json"),
            spool_size: 1024,
            idle_flush_time_ms: 5000,
            from_beginning: false,
            progress_file: PathBuf::from(".logship-progress.json"),
            harvester_idle_timeout_secs: 86400,
            scan_interval_secs: 10,
            stale_after_secs: 86400,
            watch_mode: WatchModeArg::Auto,
            watch_poll_interval_ms: 1000,
            shutdown_timeout_ms: 3000,
        }
    }
}
