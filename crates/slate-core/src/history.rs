use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::task::Task;

/// Persisted form of a [`History`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryRecord {
    pub entries: Vec<Vec<Task>>,
    pub cursor: usize,
}

/// Linear undo log of whole task-list snapshots.
///
/// Always holds at least one entry and `cursor` always indexes into
/// `entries`. Pushing discards every entry after the cursor.
#[derive(Debug, Clone)]
pub struct History {
    entries: Vec<Vec<Task>>,
    cursor: usize,
    limit: Option<usize>,
}

impl History {
    pub fn seed(snapshot: Vec<Task>) -> Self {
        Self {
            entries: vec![snapshot],
            cursor: 0,
            limit: None,
        }
    }

    /// Cap the number of retained snapshots. `0` means unlimited.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = (limit > 0).then_some(limit);
        self.enforce_limit();
        self
    }

    /// Rebuild from a persisted record, rejecting records that break the
    /// cursor invariant.
    pub fn restore(record: HistoryRecord) -> Option<Self> {
        if record.entries.is_empty() || record.cursor >= record.entries.len() {
            return None;
        }
        Some(Self {
            entries: record.entries,
            cursor: record.cursor,
            limit: None,
        })
    }

    pub fn to_record(&self) -> HistoryRecord {
        HistoryRecord {
            entries: self.entries.clone(),
            cursor: self.cursor,
        }
    }

    pub fn push(&mut self, snapshot: Vec<Task>) {
        self.entries.truncate(self.cursor + 1);
        self.entries.push(snapshot);
        self.cursor = self.entries.len() - 1;
        self.enforce_limit();
        debug!(cursor = self.cursor, len = self.entries.len(), "pushed history entry");
    }

    pub fn undo(&mut self) -> Option<&[Task]> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        Some(self.entries[self.cursor].as_slice())
    }

    pub fn redo(&mut self) -> Option<&[Task]> {
        if self.cursor + 1 >= self.entries.len() {
            return None;
        }
        self.cursor += 1;
        Some(self.entries[self.cursor].as_slice())
    }

    pub fn current(&self) -> &[Task] {
        &self.entries[self.cursor]
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.entries.len()
    }

    fn enforce_limit(&mut self) {
        let Some(limit) = self.limit else {
            return;
        };
        if self.entries.len() <= limit {
            return;
        }
        // Drop from the front, but never the entry under the cursor.
        let excess = (self.entries.len() - limit).min(self.cursor);
        self.entries.drain(..excess);
        self.cursor -= excess;
    }
}
