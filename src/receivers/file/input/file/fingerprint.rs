// SPDX-License-Identifier: Apache-2.0

use std::io::{self, SeekFrom};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

/// The last line a harvester read before its file was truncated, together with
/// the offset right after that line.
///
/// When a copy-truncate rotation produces a successor file, the successor is
/// expected to contain the same bytes at the same position. A harvester resuming
/// the successor checks this before reading on, so it does not pick up in the
/// middle of an unrelated file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailFingerprint {
    line: Vec<u8>,
    end_offset: u64,
}

impl TailFingerprint {
    pub fn new(line: Vec<u8>, end_offset: u64) -> Self {
        Self { line, end_offset }
    }

    pub fn end_offset(&self) -> u64 {
        self.end_offset
    }

    pub fn line(&self) -> &[u8] {
        &self.line
    }

    /// Compare the bytes right before `end_offset` against the remembered line.
    /// An empty fingerprint always matches. The reader position afterwards is
    /// unspecified; callers seek explicitly.
    pub async fn matches<R>(&self, reader: &mut R) -> io::Result<bool>
    where
        R: AsyncRead + AsyncSeek + Unpin,
    {
        if self.line.is_empty() {
            return Ok(true);
        }

        let len = self.line.len() as u64;
        if self.end_offset < len {
            return Ok(false);
        }

        reader.seek(SeekFrom::Start(self.end_offset - len)).await?;
        let mut buf = vec![0u8; self.line.len()];
        match reader.read_exact(&mut buf).await {
            Ok(_) => Ok(buf == self.line),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e),
        }
    }
}
