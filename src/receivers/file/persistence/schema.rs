// SPDX-License-Identifier: Apache-2.0

//! On-disk format of the progress file.
//!
//! The file is a single JSON object keyed by path:
//!
//! ```json
//! {
//!   "/var/log/app.log": {"source": "/var/log/app.log", "offset": 1234, "inode": 5678, "device": 2049}
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::receivers::file::input::FileId;

/// Delivery progress of one file: everything before `offset` has been acked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileState {
    pub source: String,
    pub offset: u64,
    pub inode: u64,
    pub device: u64,
}

impl FileState {
    pub fn file_id(&self) -> FileId {
        FileId::new(self.device, self.inode)
    }
}

/// Path to progress mapping. Merged into the stored file, never replacing it.
pub type Progress = HashMap<String, FileState>;
