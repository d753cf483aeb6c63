// SPDX-License-Identifier: Apache-2.0

//! File receiver for tailing log files.
//!
//! Prospectors find the files of each file group and start one harvester per
//! file. Harvesters follow their file across renames and truncation, with the
//! rotation watcher keeping the harvester registry in step with the file
//! system. Delivered progress is recorded by the registrar so that a restart
//! resumes where the last acknowledged line ended.

pub mod config;
pub mod control;
pub mod error;
pub mod harvester;
pub mod input;
pub mod join;
pub mod persistence;
pub mod prospector;
pub mod registrar;
pub mod registry;
pub mod watcher;

pub use config::{HarvesterConfig, ProspectorConfig, StartAt};
pub use control::{Control, Routes};
pub use error::{Error, Result};
pub use harvester::{HarvestOptions, HarvestTarget, HarvesterContext};
pub use input::{FileFinder, FileId, FileReader};
pub use join::JoinRule;
pub use persistence::{FileState, Progress, ProgressStore};
pub use prospector::{FileGroup, Prospector};
pub use registrar::Registrar;
pub use registry::{HarvesterHandle, Registry};
pub use watcher::{RotationSignal, RotationWatcher, WatchMode, WatcherConfig};
