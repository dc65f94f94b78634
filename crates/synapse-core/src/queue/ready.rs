//! Ready queue with aging.
//!
//! Ordering is (effective priority desc, submission sequence asc). Effective
//! priority grows with waiting time, so the order of two entries can change
//! while they sit in the queue. A heap keyed at insertion time cannot express
//! that; selection is a linear scan over a bounded queue instead.

use std::cmp::Reverse;
use std::time::Duration;

use tokio::time::Instant;

use crate::domain::{Priority, TaskId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyEntry {
    pub task_id: TaskId,
    pub priority: Priority,

    /// Submission sequence. Lower was submitted earlier.
    pub seq: u64,

    pub enqueued_at: Instant,
}

impl ReadyEntry {
    /// Base priority promoted one level per full `aging_threshold` waited.
    pub fn effective_priority(&self, now: Instant, aging_threshold: Duration) -> Priority {
        if aging_threshold.is_zero() {
            return self.priority;
        }
        let waited = now.saturating_duration_since(self.enqueued_at);
        let levels = waited.as_nanos() / aging_threshold.as_nanos();
        self.priority.promoted(u32::try_from(levels).unwrap_or(u32::MAX))
    }
}

#[derive(Debug, Default)]
pub struct ReadyQueue {
    entries: Vec<ReadyEntry>,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, entry: ReadyEntry) {
        self.entries.push(entry);
    }

    pub fn remove(&mut self, task_id: TaskId) -> Option<ReadyEntry> {
        let idx = self.entries.iter().position(|e| e.task_id == task_id)?;
        Some(self.entries.swap_remove(idx))
    }

    /// Remove and return the entry that should run next.
    pub fn pop_next(&mut self, now: Instant, aging_threshold: Duration) -> Option<ReadyEntry> {
        let idx = self
            .entries
            .iter()
            .enumerate()
            .max_by_key(|(_, e)| (e.effective_priority(now, aging_threshold), Reverse(e.seq)))
            .map(|(idx, _)| idx)?;
        Some(self.entries.swap_remove(idx))
    }

    /// Remove everything, oldest submission first.
    pub fn drain(&mut self) -> Vec<ReadyEntry> {
        let mut drained = std::mem::take(&mut self.entries);
        drained.sort_by_key(|e| e.seq);
        drained
    }
}
