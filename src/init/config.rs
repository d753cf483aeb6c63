// SPDX-License-Identifier: Apache-2.0

//! The JSON configuration file.
//!
//! ```json
//! {
//!   "network": {"servers": ["logs.example.com:5043"], "ssl ca": "/etc/ca.pem"},
//!   "files": [{"paths": ["/var/log/*.log"], "fields": {"type": "syslog"}}]
//! }
//! ```
//!
//! `network` is a single group, which is always named `default`, or a list of
//! named groups. File groups pick their group with `dest`.

use regex::bytes::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::exporters::lumberjack::{ExporterError, TlsConfig};
use crate::receivers::file::control::DEFAULT_GROUP;
use crate::receivers::file::join::JoinRule;
use crate::receivers::file::prospector::FileGroup;

const MAX_CONFIG_SIZE: u64 = 10 << 20;
const DEFAULT_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("config file {path:?} is {size} bytes, refusing to load more than {max}", max = MAX_CONFIG_SIZE)]
    TooLarge { path: PathBuf, size: u64 },

    #[error("failed unmarshalling config json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid join: {0}")]
    Join(String),

    #[error("invalid network config: {0}")]
    Network(String),

    #[error("invalid files config: {0}")]
    Files(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub network: Vec<NetworkGroupConfig>,
    pub files: Vec<FileGroupConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkGroupConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub servers: Vec<String>,
    #[serde(rename = "ssl certificate", default)]
    pub ssl_certificate: Option<PathBuf>,
    #[serde(rename = "ssl key", default)]
    pub ssl_key: Option<PathBuf>,
    #[serde(rename = "ssl ca", default)]
    pub ssl_ca: Option<PathBuf>,
    /// Seconds; zero or absent means the default.
    #[serde(rename = "timeout", default)]
    timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct FileGroupConfig {
    pub group: FileGroup,
    pub dest: String,
}

#[derive(Deserialize)]
struct RawConfig {
    network: RawNetwork,
    #[serde(default)]
    files: Vec<RawFileConfig>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNetwork {
    Groups(Vec<NetworkGroupConfig>),
    Single(NetworkGroupConfig),
}

#[derive(Deserialize)]
struct RawFileConfig {
    #[serde(default)]
    paths: Vec<String>,
    #[serde(default)]
    exclude: Vec<String>,
    #[serde(default)]
    fields: BTreeMap<String, String>,
    #[serde(default)]
    join: Option<RawJoin>,
    #[serde(default)]
    dest: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawJoin {
    List(Vec<JoinSpec>),
    One(JoinSpec),
}

#[derive(Deserialize)]
struct JoinSpec {
    #[serde(rename = "match", default)]
    matches: Option<String>,
    #[serde(default)]
    not: Option<String>,
    #[serde(default)]
    with: Option<String>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut file = File::open(path).map_err(io_err)?;
        let size = file.metadata().map_err(io_err)?.len();
        if size > MAX_CONFIG_SIZE {
            return Err(ConfigError::TooLarge {
                path: path.to_path_buf(),
                size,
            });
        }

        let mut contents = String::with_capacity(size as usize);
        file.read_to_string(&mut contents).map_err(io_err)?;
        Self::parse(&contents)
    }

    pub fn parse(json: &str) -> Result<Config, ConfigError> {
        let raw: RawConfig = serde_json::from_str(json)?;

        let network = network_groups(raw.network)?;
        let names: HashSet<&str> = network.iter().map(|g| g.name.as_str()).collect();

        if raw.files.is_empty() {
            return Err(ConfigError::Files("no file groups configured".to_string()));
        }
        let mut files = Vec::with_capacity(raw.files.len());
        for (i, f) in raw.files.into_iter().enumerate() {
            let paths: Vec<String> = f
                .paths
                .iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
            if paths.is_empty() {
                return Err(ConfigError::Files(format!("file group {} has no paths", i)));
            }

            let dest = match f.dest {
                Some(d) if !d.is_empty() => d,
                _ => DEFAULT_GROUP.to_string(),
            };
            if !names.contains(dest.as_str()) {
                return Err(ConfigError::Files(format!(
                    "file group {} sends to unknown network group {:?}",
                    i, dest
                )));
            }

            files.push(FileGroupConfig {
                group: FileGroup {
                    paths,
                    exclude: f.exclude,
                    fields: f.fields,
                    join: join_rule(f.join)?,
                },
                dest,
            });
        }

        Ok(Config { network, files })
    }
}

impl NetworkGroupConfig {
    pub fn timeout(&self) -> Duration {
        match self.timeout_secs {
            0 => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            secs => Duration::from_secs(secs),
        }
    }

    pub fn tls_config(&self) -> Result<TlsConfig, ExporterError> {
        let mut builder = TlsConfig::builder();
        if let Some(ca) = non_empty(&self.ssl_ca) {
            builder = builder.with_ca_file(ca);
        }
        if let Some(cert) = non_empty(&self.ssl_certificate) {
            builder = builder.with_cert_file(cert);
        }
        if let Some(key) = non_empty(&self.ssl_key) {
            builder = builder.with_key_file(key);
        }
        builder.build()
    }
}

fn non_empty(path: &Option<PathBuf>) -> Option<&Path> {
    path.as_deref().filter(|p| !p.as_os_str().is_empty())
}

fn network_groups(raw: RawNetwork) -> Result<Vec<NetworkGroupConfig>, ConfigError> {
    let groups = match raw {
        RawNetwork::Single(mut group) => {
            if !group.name.is_empty() && group.name != DEFAULT_GROUP {
                return Err(ConfigError::Network(format!(
                    "a single network group must be named {:?}, not {:?}",
                    DEFAULT_GROUP, group.name
                )));
            }
            group.name = DEFAULT_GROUP.to_string();
            vec![group]
        }
        RawNetwork::Groups(groups) => groups,
    };
    if groups.is_empty() {
        return Err(ConfigError::Network("no network groups configured".to_string()));
    }

    let mut seen = HashSet::new();
    let mut resolved = Vec::with_capacity(groups.len());
    for mut group in groups {
        if group.name.is_empty() {
            group.name = DEFAULT_GROUP.to_string();
        }
        if !seen.insert(group.name.clone()) {
            return Err(ConfigError::Network(format!(
                "duplicate network group name: {}",
                group.name
            )));
        }
        if group.servers.is_empty() {
            return Err(ConfigError::Network(format!(
                "network group {} has no servers",
                group.name
            )));
        }
        resolved.push(group);
    }
    Ok(resolved)
}

fn join_rule(raw: Option<RawJoin>) -> Result<JoinRule, ConfigError> {
    let spec = match raw {
        None => return Ok(JoinRule::None),
        Some(RawJoin::One(spec)) => spec,
        Some(RawJoin::List(mut specs)) => match specs.len() {
            0 => return Ok(JoinRule::None),
            1 => specs.remove(0),
            n => {
                return Err(ConfigError::Join(format!(
                    "only one join rule per file group is supported, found {}",
                    n
                )));
            }
        },
    };

    if spec.with.as_deref() != Some("previous") {
        return Err(ConfigError::Join(format!(
            "illegal with specifier: {:?}",
            spec.with.unwrap_or_default()
        )));
    }

    let compile = |kind: &str, pattern: &str| {
        Regex::new(pattern)
            .map_err(|e| ConfigError::Join(format!("illegal {} pattern: {}", kind, e)))
    };
    let matches = spec.matches.filter(|p| !p.is_empty());
    let not = spec.not.filter(|p| !p.is_empty());
    match (matches, not) {
        (Some(_), Some(_)) => Err(ConfigError::Join(
            "\"not\" and \"match\" are mutually exclusive".to_string(),
        )),
        (Some(pattern), None) => Ok(JoinRule::JoinIfMatches(compile("match", &pattern)?)),
        (None, Some(pattern)) => Ok(JoinRule::JoinUnlessMatches(compile("not", &pattern)?)),
        (None, None) => Ok(JoinRule::None),
    }
}
