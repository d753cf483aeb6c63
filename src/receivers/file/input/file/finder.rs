// SPDX-License-Identifier: Apache-2.0

use glob::{Pattern, glob};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::receivers::file::error::{Error, Result};

/// FileFinder expands the glob patterns of a file group into the regular files
/// that currently match them, dropping anything matched by an exclude pattern.
#[derive(Debug, Clone)]
pub struct FileFinder {
    include: Vec<String>,
    include_patterns: Vec<Pattern>,
    exclude_patterns: Vec<Pattern>,
}

impl FileFinder {
    /// Compile the include and exclude patterns. Fails on the first invalid one.
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Result<Self> {
        let include_patterns = compile(&include)?;
        let exclude_patterns = compile(&exclude)?;
        Ok(Self {
            include,
            include_patterns,
            exclude_patterns,
        })
    }

    /// Whether `path` is selected by this finder without touching the filesystem.
    pub fn matches(&self, path: &Path) -> bool {
        self.include_patterns.iter().any(|p| p.matches_path(path)) && !self.is_excluded(path)
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.exclude_patterns.iter().any(|p| p.matches_path(path))
    }

    /// Find all files matching the include patterns. Directories are skipped,
    /// and unreadable entries are logged rather than failing the whole scan.
    pub fn find_files(&self) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        let mut paths = Vec::new();

        for pattern in &self.include {
            let matches = match glob(pattern) {
                Ok(m) => m,
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "Failed to expand glob pattern");
                    continue;
                }
            };

            for entry in matches {
                let path = match entry {
                    Ok(p) => p,
                    Err(e) => {
                        debug!(path = ?e.path(), error = %e.error(), "Skipping unreadable glob match");
                        continue;
                    }
                };

                if path.is_dir() {
                    debug!(path = ?path, "Skipping directory matched by glob");
                    continue;
                }

                if self.is_excluded(&path) {
                    continue;
                }

                if seen.insert(path.clone()) {
                    paths.push(path);
                }
            }
        }

        paths
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| Pattern::new(p).map_err(|e| Error::InvalidGlob(format!("{}: {}", p, e))))
        .collect()
}
