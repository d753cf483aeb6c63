// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

use crate::receivers::file::input::{FileId, STDIN_PATH};
use crate::receivers::file::persistence::{FileState, Progress};

/// Field added to every event describing whether its file was rotated away.
pub const ROTATED_FIELD: &str = "rotated";

/// One line read from a log file.
#[derive(Clone, Debug, PartialEq)]
pub struct FileEvent {
    /// Path of the file the line was read from, at the time it was read.
    pub source: String,
    /// Byte offset at which the line began.
    pub offset: u64,
    /// Raw line bytes without the trailing newline.
    pub text: Bytes,
    /// Bytes read from the file for this event, newline included when there
    /// was one. A partial line emitted at EOF has none.
    pub consumed: u64,
    /// User fields from the file group plus the `rotated` marker.
    pub fields: BTreeMap<String, String>,
    /// The harvester's file was renamed away from its configured path.
    pub rotated: bool,
    /// Identity of the open file. Never sent on the wire.
    pub file_id: Option<FileId>,
}

impl FileEvent {
    /// Offset of the first byte not covered by this event.
    pub fn end_offset(&self) -> u64 {
        self.offset + self.consumed
    }

    pub fn text_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.text)
    }
}

/// The events of one spooler flush, in arrival order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventPage {
    pub events: Vec<FileEvent>,
}

impl EventPage {
    pub fn new(events: Vec<FileEvent>) -> Self {
        Self { events }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Delivery progress represented by this page, one entry per source.
    ///
    /// Standard input, events without a path and events from files that were
    /// rotated away are skipped. When a source appears more than once the last
    /// event wins, since pages keep arrival order.
    pub fn progress(&self) -> Progress {
        let mut progress: HashMap<String, FileState> = HashMap::new();
        for event in &self.events {
            if event.source.is_empty() || event.source == STDIN_PATH || event.rotated {
                continue;
            }
            let Some(id) = event.file_id else {
                continue;
            };
            progress.insert(
                event.source.clone(),
                FileState {
                    source: event.source.clone(),
                    offset: event.end_offset(),
                    inode: id.ino(),
                    device: id.dev(),
                },
            );
        }
        progress
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    pub(crate) fn event(source: &str, offset: u64, text: &str) -> FileEvent {
        let mut fields = BTreeMap::new();
        fields.insert(ROTATED_FIELD.to_string(), "false".to_string());
        FileEvent {
            source: source.to_string(),
            offset,
            text: Bytes::copy_from_slice(text.as_bytes()),
            consumed: text.len() as u64 + 1,
            fields,
            rotated: false,
            file_id: Some(FileId::new(8, 42)),
        }
    }

    #[test]
    fn test_progress_last_event_wins() {
        let page = EventPage::new(vec![
            event("/tmp/a.log", 0, "hello"),
            event("/tmp/b.log", 10, "x"),
            event("/tmp/a.log", 6, "world"),
        ]);

        let progress = page.progress();
        assert_eq!(progress.len(), 2);

        let a = &progress["/tmp/a.log"];
        assert_eq!(a.offset, 12);
        assert_eq!(a.source, "/tmp/a.log");
        assert_eq!(a.inode, 42);
        assert_eq!(a.device, 8);

        assert_eq!(progress["/tmp/b.log"].offset, 12);
    }

    #[test]
    fn test_progress_skips_stdin_and_rotated() {
        let mut rotated = event("/tmp/a.log.1", 0, "old");
        rotated.rotated = true;
        let mut stdin = event("-", 0, "piped");
        stdin.file_id = None;

        let page = EventPage::new(vec![rotated, stdin, event("", 0, "nameless")]);
        assert!(page.progress().is_empty());
    }

    #[test]
    fn test_progress_of_unterminated_line() {
        let mut partial = event("/tmp/a.log", 4, "parti");
        partial.consumed = 5;

        let page = EventPage::new(vec![event("/tmp/a.log", 0, "one"), partial]);
        assert_eq!(page.progress()["/tmp/a.log"].offset, 9);
    }
}
