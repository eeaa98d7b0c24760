//! Recent activity kept per channel and per user.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::message::Tags;

/// Lines kept per buffer.
pub const BUFFER_CAPACITY: usize = 64;

/// One remembered message or notice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferLine {
    /// Sender nickname; `None` for lines we sent.
    pub sender: Option<String>,
    pub message: String,
    /// CTCP ACTION with the wrapper stripped.
    pub action: bool,
    pub notice: bool,
    pub tags: Tags,
    pub from_self: bool,
    pub timestamp: DateTime<Utc>,
}

/// Bounded ring of recent lines, newest last.
#[derive(Clone, Debug)]
pub struct Buffer {
    lines: VecDeque<BufferLine>,
    capacity: usize,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::with_capacity(BUFFER_CAPACITY)
    }
}

impl Buffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, line: BufferLine) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn add_message(
        &mut self,
        sender: Option<&str>,
        message: &str,
        action: bool,
        tags: &Tags,
        from_self: bool,
    ) {
        self.push(BufferLine {
            sender: sender.map(str::to_owned),
            message: message.to_owned(),
            action,
            notice: false,
            tags: tags.clone(),
            from_self,
            timestamp: Utc::now(),
        });
    }

    pub fn add_notice(&mut self, sender: Option<&str>, message: &str, tags: &Tags, from_self: bool) {
        self.push(BufferLine {
            sender: sender.map(str::to_owned),
            message: message.to_owned(),
            action: false,
            notice: true,
            tags: tags.clone(),
            from_self,
            timestamp: Utc::now(),
        });
    }

    /// Most recent line.
    pub fn latest(&self) -> Option<&BufferLine> {
        self.lines.back()
    }

    /// Newest line whose text contains `needle`.
    pub fn find(&self, needle: &str) -> Option<&BufferLine> {
        self.iter().find(|line| line.message.contains(needle))
    }

    /// Lines from newest to oldest.
    pub fn iter(&self) -> impl Iterator<Item = &BufferLine> {
        self.lines.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
