// SPDX-License-Identifier: Apache-2.0

pub mod file;

pub use file::{FileFinder, FileId, FileReader, FileStatus, STDIN_PATH, TailFingerprint};
