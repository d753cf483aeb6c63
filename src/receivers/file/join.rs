// SPDX-License-Identifier: Apache-2.0

//! Multi-line joining.
//!
//! A file group may declare that some lines continue the previous one, for
//! example indented stack trace frames. Continuation lines are appended to a
//! pending line which is released once a line that starts a new record shows up.

use regex::bytes::Regex;

/// When a line is folded into the previous one.
#[derive(Debug, Clone, Default)]
pub enum JoinRule {
    /// Every line is its own event.
    #[default]
    None,
    /// Lines matching the pattern continue the previous line.
    JoinIfMatches(Regex),
    /// Lines not matching the pattern continue the previous line.
    JoinUnlessMatches(Regex),
}

impl JoinRule {
    /// `line` must not include its trailing newline.
    pub fn is_continuation(&self, line: &[u8]) -> bool {
        match self {
            JoinRule::None => false,
            JoinRule::JoinIfMatches(re) => re.is_match(line),
            JoinRule::JoinUnlessMatches(re) => !re.is_match(line),
        }
    }
}

/// A complete record: raw bytes (newlines included) and the offset of its
/// first byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedLine {
    pub raw: Vec<u8>,
    pub offset: u64,
}

#[derive(Debug, Default)]
pub(crate) struct LineJoiner {
    rule: JoinRule,
    pending: Option<JoinedLine>,
}

impl LineJoiner {
    pub(crate) fn new(rule: JoinRule) -> Self {
        Self {
            rule,
            pending: None,
        }
    }

    /// Feed one raw line read at `offset`, returning a record when one is complete.
    pub(crate) fn push(&mut self, raw: &[u8], offset: u64) -> Option<JoinedLine> {
        if let JoinRule::None = self.rule {
            return Some(JoinedLine {
                raw: raw.to_vec(),
                offset,
            });
        }

        let line = raw.strip_suffix(b"\n").unwrap_or(raw);
        if self.rule.is_continuation(line) {
            match &mut self.pending {
                Some(pending) => pending.raw.extend_from_slice(raw),
                None => {
                    self.pending = Some(JoinedLine {
                        raw: raw.to_vec(),
                        offset,
                    })
                }
            }
            return None;
        }

        self.pending.replace(JoinedLine {
            raw: raw.to_vec(),
            offset,
        })
    }

    /// Release whatever is pending, used when the harvester stops or rewinds.
    pub(crate) fn flush(&mut self) -> Option<JoinedLine> {
        self.pending.take()
    }
}
