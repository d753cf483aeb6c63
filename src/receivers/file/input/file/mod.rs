// SPDX-License-Identifier: Apache-2.0

mod file_id;
mod finder;
mod fingerprint;
mod reader;

pub use file_id::FileId;
pub use finder::FileFinder;
pub use fingerprint::TailFingerprint;
pub use reader::{FileReader, FileStatus, STDIN_PATH};
