// SPDX-License-Identifier: Apache-2.0

//! Operational commands: `info` lists the running harvesters and `replay`
//! harvests a file again from a given offset.
//!
//! Commands arrive as text lines; how they reach the agent is up to the
//! caller.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

use crate::bounded_channel::BoundedSender;
use crate::receivers::file::harvester::{HarvestOptions, HarvestTarget, HarvesterContext};
use crate::topology::payload::FileEvent;

pub const DEFAULT_GROUP: &str = "default";

const REPLAY_USAGE: &str =
    "usage: replay [--offset=N] [--dest=GROUP] <path> [field1=value1 ... fieldN=valueN]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Info,
    Replay(ReplayRequest),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayRequest {
    pub path: PathBuf,
    pub offset: u64,
    pub dest: Option<String>,
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    Unknown(String),

    #[error("argument error: {0}\n{usage}", usage = REPLAY_USAGE)]
    InvalidArgument(String),

    #[error("{usage}", usage = REPLAY_USAGE)]
    MissingPath,

    #[error("unable to parse field: {0}")]
    InvalidField(String),

    #[error("unknown destination: {0}")]
    UnknownDestination(String),
}

/// Parse one command line. Blank lines are `None`.
pub fn parse(line: &str) -> Option<Result<Command, CommandError>> {
    let mut words = line.split_whitespace();
    let name = words.next()?;
    let args: Vec<&str> = words.collect();

    Some(match name {
        "info" => Ok(Command::Info),
        "replay" => parse_replay(&args).map(Command::Replay),
        other => Err(CommandError::Unknown(other.to_string())),
    })
}

fn parse_replay(args: &[&str]) -> Result<ReplayRequest, CommandError> {
    let mut request = ReplayRequest::default();
    let mut rest = args.iter().copied().peekable();

    // flags come first, the first non-flag argument ends them
    while let Some(arg) = rest.next_if(|a| a.starts_with('-') && *a != "-") {
        let flag = arg.trim_start_matches('-');
        let (name, value) = match flag.split_once('=') {
            Some((name, value)) => (name, value.to_string()),
            None => {
                let value = rest.next().ok_or_else(|| {
                    CommandError::InvalidArgument(format!("flag needs an argument: {}", arg))
                })?;
                (flag, value.to_string())
            }
        };

        match name {
            "offset" => {
                request.offset = value.parse().map_err(|_| {
                    CommandError::InvalidArgument(format!("invalid offset {:?}", value))
                })?
            }
            "dest" => request.dest = Some(value),
            _ => {
                return Err(CommandError::InvalidArgument(format!(
                    "flag provided but not defined: {}",
                    arg
                )));
            }
        }
    }

    request.path = PathBuf::from(rest.next().ok_or(CommandError::MissingPath)?);
    for field in rest {
        match field.split_once('=') {
            Some((key, value)) if !key.is_empty() && !value.contains('=') => {
                request.fields.insert(key.to_string(), value.trim().to_string());
            }
            _ => return Err(CommandError::InvalidField(field.to_string())),
        }
    }
    Ok(request)
}

/// Where replayed events go: the spooler input of each network group, and
/// the destination of every path a file group lists literally.
#[derive(Clone, Default)]
pub struct Routes {
    groups: HashMap<String, BoundedSender<FileEvent>>,
    literal_paths: HashMap<PathBuf, String>,
}

impl Routes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_group(&mut self, name: impl Into<String>, events: BoundedSender<FileEvent>) {
        self.groups.insert(name.into(), events);
    }

    /// The first group to list a path keeps it.
    pub fn add_path(&mut self, path: impl Into<PathBuf>, dest: impl Into<String>) {
        self.literal_paths
            .entry(path.into())
            .or_insert_with(|| dest.into());
    }

    pub fn group(&self, name: &str) -> Option<&BoundedSender<FileEvent>> {
        self.groups.get(name)
    }

    fn route(&self, request: &ReplayRequest) -> Result<&BoundedSender<FileEvent>, CommandError> {
        let dest = match &request.dest {
            Some(dest) => dest.as_str(),
            None => self
                .literal_paths
                .get(&request.path)
                .map(String::as_str)
                .unwrap_or(DEFAULT_GROUP),
        };
        self.groups
            .get(dest)
            .ok_or_else(|| CommandError::UnknownDestination(dest.to_string()))
    }
}

pub struct Control {
    ctx: HarvesterContext,
    routes: Routes,
}

impl Control {
    pub fn new(ctx: HarvesterContext, routes: Routes) -> Self {
        Self { ctx, routes }
    }

    /// Run one command line and return the response text.
    pub fn execute(&self, line: &str) -> String {
        match parse(line) {
            None => String::new(),
            Some(Ok(Command::Info)) => self.info(),
            Some(Ok(Command::Replay(request))) => match self.replay(request) {
                Ok(()) => "ok\n".to_string(),
                Err(e) => format!("{}\n", e),
            },
            Some(Err(e)) => format!("{}\n", e),
        }
    }

    fn info(&self) -> String {
        let snapshot = self.ctx.registry().snapshot();
        match serde_json::to_string_pretty(&snapshot) {
            Ok(mut json) => {
                json.push('\n');
                json
            }
            Err(e) => format!("unable to render harvesters: {}\n", e),
        }
    }

    fn replay(&self, request: ReplayRequest) -> Result<(), CommandError> {
        let output = self.routes.route(&request)?.clone();
        info!(path = ?request.path, offset = request.offset, "Replaying file");

        let target = HarvestTarget::new(request.path, output).with_fields(request.fields);
        self.ctx
            .spawn(target, request.offset, HarvestOptions::rewind());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded_channel::{BoundedReceiver, bounded};
    use crate::receivers::file::config::{HarvesterConfig, StartAt};
    use crate::receivers::file::registry::Registry;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    fn replay(line: &str) -> ReplayRequest {
        match parse(line) {
            Some(Ok(Command::Replay(r))) => r,
            other => panic!("unexpected parse result {:?}", other),
        }
    }

    #[test]
    fn test_parse_info_and_blank() {
        assert_eq!(parse("info\n"), Some(Ok(Command::Info)));
        assert_eq!(parse("   \n"), None);
        assert_eq!(
            parse("status"),
            Some(Err(CommandError::Unknown("status".to_string())))
        );
    }

    #[test]
    fn test_parse_replay() {
        let r = replay("replay --offset=120 --dest=archive /var/log/app.log env=prod tier=web");
        assert_eq!(r.path, PathBuf::from("/var/log/app.log"));
        assert_eq!(r.offset, 120);
        assert_eq!(r.dest.as_deref(), Some("archive"));
        assert_eq!(r.fields["env"], "prod");
        assert_eq!(r.fields["tier"], "web");

        let r = replay("replay -offset 7 /tmp/a.log");
        assert_eq!(r.offset, 7);
        assert_eq!(r.dest, None);
        assert!(r.fields.is_empty());
    }

    #[test]
    fn test_parse_replay_errors() {
        assert_eq!(parse("replay"), Some(Err(CommandError::MissingPath)));
        assert!(matches!(
            parse("replay --offset=abc /tmp/a.log"),
            Some(Err(CommandError::InvalidArgument(_)))
        ));
        assert!(matches!(
            parse("replay --verbose /tmp/a.log"),
            Some(Err(CommandError::InvalidArgument(_)))
        ));
        assert_eq!(
            parse("replay /tmp/a.log nofield"),
            Some(Err(CommandError::InvalidField("nofield".to_string())))
        );
    }

    #[test]
    fn test_replay_errors_print_usage() {
        assert_eq!(CommandError::MissingPath.to_string(), REPLAY_USAGE);
        assert_eq!(
            CommandError::InvalidArgument("invalid offset \"x\"".to_string()).to_string(),
            format!("argument error: invalid offset \"x\"\n{}", REPLAY_USAGE)
        );
    }

    fn control() -> (Control, BoundedReceiver<FileEvent>, BoundedReceiver<FileEvent>) {
        let config = HarvesterConfig {
            start_at: StartAt::End,
            idle_timeout: Duration::from_secs(60),
            open_retry_delay: Duration::from_millis(10),
            eof_poll_interval: Duration::from_millis(10),
            partial_line_delay: Duration::from_millis(10),
        };
        let ctx = HarvesterContext::new(Arc::new(Registry::new()), config, None);

        let (default_tx, default_rx) = bounded(16);
        let (archive_tx, archive_rx) = bounded(16);
        let mut routes = Routes::new();
        routes.add_group(DEFAULT_GROUP, default_tx);
        routes.add_group("archive", archive_tx);
        (Control::new(ctx, routes), default_rx, archive_rx)
    }

    #[tokio::test]
    async fn test_replay_rewinds_to_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "one\ntwo\n").unwrap();
        let (control, mut default_rx, _archive_rx) = control();

        let response = control.execute(&format!("replay {} source=replay", path.display()));
        assert_eq!(response, "ok\n");

        let event = timeout(Duration::from_secs(5), default_rx.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.text_lossy(), "one");
        assert_eq!(event.offset, 0);
        assert_eq!(event.fields["source"], "replay");

        let info = control.execute("info");
        let harvesters: serde_json::Value = serde_json::from_str(&info).unwrap();
        assert_eq!(harvesters.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_replay_routes_to_literal_path_group() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.log");
        std::fs::write(&path, "a\nb\n").unwrap();
        let (mut control, _default_rx, mut archive_rx) = control();
        control.routes.add_path(&path, "archive");

        let response = control.execute(&format!("replay --offset=2 {}", path.display()));
        assert_eq!(response, "ok\n");

        let event = timeout(Duration::from_secs(5), archive_rx.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.text_lossy(), "b");
        assert_eq!(event.offset, 2);
    }

    #[tokio::test]
    async fn test_replay_unknown_destination() {
        let (control, _d, _a) = control();
        let response = control.execute("replay --dest=nowhere /tmp/a.log");
        assert_eq!(response, "unknown destination: nowhere\n");
    }
}
