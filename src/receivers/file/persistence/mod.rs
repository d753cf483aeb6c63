// SPDX-License-Identifier: Apache-2.0

//! Persistence of delivery progress.
//!
//! Uses JSON file storage with atomic writes so a crash never leaves a
//! partially written progress file behind.

mod json_file;
mod schema;

pub use json_file::ProgressStore;
pub use schema::{FileState, Progress};
