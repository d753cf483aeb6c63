// SPDX-License-Identifier: Apache-2.0

use std::fs::Metadata;
use std::io::{self, SeekFrom};
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader, Stdin};

use super::file_id::FileId;
use super::fingerprint::TailFingerprint;

/// Path that selects standard input instead of a file.
pub const STDIN_PATH: &str = "-";

enum Source {
    Stdin(BufReader<Stdin>),
    File(BufReader<File>),
}

/// What a harvester learns about its file once it has nothing left to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    /// Still linked (or unlinked with bytes left to drain); wait for more data.
    Active,
    /// The file shrank below the read position.
    Truncated { size: u64 },
    /// Unlinked and fully drained.
    Removed,
}

/// Line-oriented reader over a log file or standard input.
pub struct FileReader {
    source: Source,
}

impl FileReader {
    /// Open `path` for reading, or standard input when the path is `-`.
    pub async fn open(path: &Path) -> io::Result<Self> {
        if path.as_os_str() == STDIN_PATH {
            return Ok(Self {
                source: Source::Stdin(BufReader::new(tokio::io::stdin())),
            });
        }

        let file = File::open(path).await?;
        Ok(Self {
            source: Source::File(BufReader::new(file)),
        })
    }

    pub fn is_stdin(&self) -> bool {
        matches!(self.source, Source::Stdin(_))
    }

    /// Metadata of the open handle. Standard input has none.
    pub async fn metadata(&self) -> io::Result<Option<Metadata>> {
        match &self.source {
            Source::Stdin(_) => Ok(None),
            Source::File(reader) => reader.get_ref().metadata().await.map(Some),
        }
    }

    pub async fn file_id(&self) -> io::Result<Option<FileId>> {
        Ok(self.metadata().await?.map(|m| FileId::from_metadata(&m)))
    }

    /// Seek to an absolute position. A no-op for standard input.
    pub async fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match &mut self.source {
            Source::Stdin(_) => Ok(0),
            Source::File(reader) => reader.seek(pos).await,
        }
    }

    /// Read up to and including the next newline, appending to `buf`.
    ///
    /// Returns the number of bytes read. Zero means EOF; a non-zero read that
    /// does not end in a newline is a partial line sitting at EOF.
    pub async fn read_line(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        match &mut self.source {
            Source::Stdin(reader) => reader.read_until(b'\n', buf).await,
            Source::File(reader) => reader.read_until(b'\n', buf).await,
        }
    }

    /// Inspect the open handle after reaching EOF at `offset`.
    pub async fn status(&self, offset: u64) -> io::Result<FileStatus> {
        let Some(metadata) = self.metadata().await? else {
            return Ok(FileStatus::Active);
        };

        let size = metadata.len();
        if metadata.nlink() == 0 {
            if size > offset {
                return Ok(FileStatus::Active);
            }
            return Ok(FileStatus::Removed);
        }

        if size < offset {
            return Ok(FileStatus::Truncated { size });
        }

        Ok(FileStatus::Active)
    }

    /// Check the bytes before the fingerprint's offset and, if they match,
    /// position the reader right after them.
    pub async fn resume_at(&mut self, fingerprint: &TailFingerprint) -> io::Result<bool> {
        let Source::File(reader) = &mut self.source else {
            return Ok(false);
        };

        if !fingerprint.matches(reader).await? {
            return Ok(false);
        }
        reader.seek(SeekFrom::Start(fingerprint.end_offset())).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_read_lines_and_partial() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, b"one\ntwo\nthr").unwrap();

        let mut reader = FileReader::open(&path).await.unwrap();
        let mut buf = Vec::new();

        assert_eq!(reader.read_line(&mut buf).await.unwrap(), 4);
        assert_eq!(buf, b"one\n");

        buf.clear();
        assert_eq!(reader.read_line(&mut buf).await.unwrap(), 4);
        assert_eq!(buf, b"two\n");

        buf.clear();
        assert_eq!(reader.read_line(&mut buf).await.unwrap(), 3);
        assert_eq!(buf, b"thr");

        buf.clear();
        assert_eq!(reader.read_line(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reads_appended_data_after_eof() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, b"one\n").unwrap();

        let mut reader = FileReader::open(&path).await.unwrap();
        let mut buf = Vec::new();
        reader.read_line(&mut buf).await.unwrap();
        buf.clear();
        assert_eq!(reader.read_line(&mut buf).await.unwrap(), 0);

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"two\n").unwrap();

        assert_eq!(reader.read_line(&mut buf).await.unwrap(), 4);
        assert_eq!(buf, b"two\n");
    }

    #[tokio::test]
    async fn test_status_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, b"0123456789\n").unwrap();

        let reader = FileReader::open(&path).await.unwrap();
        assert_eq!(reader.status(11).await.unwrap(), FileStatus::Active);

        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(0)
            .unwrap();
        assert_eq!(
            reader.status(11).await.unwrap(),
            FileStatus::Truncated { size: 0 }
        );
    }

    #[tokio::test]
    async fn test_status_removed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, b"0123456789\n").unwrap();

        let reader = FileReader::open(&path).await.unwrap();
        std::fs::remove_file(&path).unwrap();

        // unread bytes remain, keep draining
        assert_eq!(reader.status(0).await.unwrap(), FileStatus::Active);
        assert_eq!(reader.status(11).await.unwrap(), FileStatus::Removed);
    }

    #[tokio::test]
    async fn test_resume_at_fingerprint() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log.1");
        std::fs::write(&path, b"first\nsecond\nthird\n").unwrap();

        let mut reader = FileReader::open(&path).await.unwrap();
        let fp = TailFingerprint::new(b"second\n".to_vec(), 13);
        assert!(reader.resume_at(&fp).await.unwrap());

        let mut buf = Vec::new();
        reader.read_line(&mut buf).await.unwrap();
        assert_eq!(buf, b"third\n");

        let bad = TailFingerprint::new(b"nope\n".to_vec(), 13);
        let mut reader = FileReader::open(&path).await.unwrap();
        assert!(!reader.resume_at(&bad).await.unwrap());
    }
}
