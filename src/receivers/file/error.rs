// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

use crate::receivers::file::input::FileId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Invalid glob pattern: {0}")]
    InvalidGlob(String),

    #[error("Path {0:?} is already being harvested")]
    PathInUse(PathBuf),

    #[error("File {0} is already being harvested")]
    IdentityInUse(FileId),

    #[error("Harvester for {0:?} has no file identity")]
    MissingIdentity(PathBuf),

    #[error("Downstream channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
