//! Task registry - the orchestrator's owned table of tasks.
//!
//! Live tasks stay until they finish. Terminal tasks are kept in a bounded
//! retention window, oldest evicted first.

use std::collections::{HashMap, VecDeque};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::domain::{RecordStatus, StateCounts, Task, TaskId, TaskState, TaskStatus};

pub(crate) struct TaskEntry {
    pub task: Task,
    pub cancel: CancellationToken,
    /// Cancel was asked for while running; the outcome will be `cancelled`.
    pub cancel_requested: bool,
    pub retried_as: Option<TaskId>,
    pub record_status: RecordStatus,
    state_tx: watch::Sender<TaskState>,
}

impl TaskEntry {
    fn new(task: Task) -> Self {
        let (state_tx, _) = watch::channel(task.state());
        Self {
            task,
            cancel: CancellationToken::new(),
            cancel_requested: false,
            retried_as: None,
            record_status: RecordStatus::Pending,
            state_tx,
        }
    }

    /// Publish the task's current state to waiters.
    pub fn publish_state(&self) {
        self.state_tx.send_replace(self.task.state());
    }

    pub fn watch_state(&self) -> watch::Receiver<TaskState> {
        self.state_tx.subscribe()
    }

    pub fn status(&self) -> TaskStatus {
        TaskStatus::from_task(
            &self.task,
            self.retried_as,
            self.cancel_requested && !self.task.state().is_terminal(),
            self.record_status.clone(),
        )
    }
}

pub(crate) struct TaskRegistry {
    entries: HashMap<TaskId, TaskEntry>,
    /// Terminal tasks, oldest first.
    retired: VecDeque<TaskId>,
    retention: usize,
}

impl TaskRegistry {
    pub fn new(retention: usize) -> Self {
        Self {
            entries: HashMap::new(),
            retired: VecDeque::new(),
            retention,
        }
    }

    pub fn insert(&mut self, task: Task) {
        self.entries.insert(task.id(), TaskEntry::new(task));
    }

    pub fn get(&self, task_id: TaskId) -> Option<&TaskEntry> {
        self.entries.get(&task_id)
    }

    pub fn get_mut(&mut self, task_id: TaskId) -> Option<&mut TaskEntry> {
        self.entries.get_mut(&task_id)
    }

    /// Move a task that just turned terminal into the retention window.
    ///
    /// Returns the ids evicted to make room.
    pub fn retire(&mut self, task_id: TaskId) -> Vec<TaskId> {
        self.retired.push_back(task_id);
        let mut evicted = Vec::new();
        while self.retired.len() > self.retention {
            let Some(oldest) = self.retired.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
            evicted.push(oldest);
        }
        evicted
    }

    /// Ids of tasks currently in one of `states`, oldest first.
    pub fn ids_in(&self, states: &[TaskState]) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self
            .entries
            .values()
            .filter(|e| states.contains(&e.task.state()))
            .map(|e| e.task.id())
            .collect();
        ids.sort();
        ids
    }

    pub fn counts(&self) -> StateCounts {
        self.entries.values().map(|e| e.task.state()).collect()
    }

    /// Follow `retried_as` from `task_id` to the newest attempt still
    /// retained. `None` when `task_id` itself is unknown.
    pub fn latest_attempt(&self, task_id: TaskId) -> Option<(TaskId, TaskState)> {
        let mut current = self.get(task_id)?;
        while let Some(next) = current.retried_as.and_then(|id| self.get(id)) {
            current = next;
        }
        Some((current.task.id(), current.task.state()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Metadata, Priority};
    use chrono::Utc;
    use serde_json::json;
    use ulid::Ulid;

    fn task() -> Task {
        Task::new(
            TaskId::from_ulid(Ulid::new()),
            json!("work"),
            Priority::Normal,
            Metadata::default(),
            Utc::now(),
        )
    }

    fn cancelled(registry: &mut TaskRegistry) -> TaskId {
        let t = task();
        let id = t.id();
        registry.insert(t);
        let entry = registry.get_mut(id).unwrap();
        entry.task.cancel(Utc::now()).unwrap();
        entry.publish_state();
        id
    }

    #[test]
    fn retention_evicts_oldest_terminal_first() {
        let mut registry = TaskRegistry::new(2);
        let live = task();
        let live_id = live.id();
        registry.insert(live);

        let a = cancelled(&mut registry);
        let b = cancelled(&mut registry);
        let c = cancelled(&mut registry);
        assert!(registry.retire(a).is_empty());
        assert!(registry.retire(b).is_empty());
        assert_eq!(registry.retire(c), vec![a]);

        assert!(registry.get(a).is_none());
        assert!(registry.get(b).is_some());
        assert!(registry.get(live_id).is_some());
        assert_eq!(registry.entries.len(), 3);
    }

    #[tokio::test]
    async fn watchers_see_published_state() {
        let mut registry = TaskRegistry::new(10);
        let t = task();
        let id = t.id();
        registry.insert(t);

        let mut rx = registry.get(id).unwrap().watch_state();
        assert_eq!(*rx.borrow(), TaskState::Pending);

        let entry = registry.get_mut(id).unwrap();
        entry.task.cancel(Utc::now()).unwrap();
        entry.publish_state();

        let state = *rx.wait_for(|s| s.is_terminal()).await.unwrap();
        assert_eq!(state, TaskState::Cancelled);
    }

    #[test]
    fn latest_attempt_follows_retries() {
        let mut registry = TaskRegistry::new(10);
        let first = cancelled(&mut registry);
        let retry = task();
        let retry_id = retry.id();
        registry.insert(retry);
        registry.get_mut(first).unwrap().retried_as = Some(retry_id);

        assert_eq!(
            registry.latest_attempt(first),
            Some((retry_id, TaskState::Pending))
        );
        assert_eq!(
            registry.latest_attempt(retry_id),
            Some((retry_id, TaskState::Pending))
        );
        assert_eq!(registry.latest_attempt(TaskId::from_ulid(Ulid::new())), None);

        // retry already evicted: the chain stops at the last retained attempt
        registry.get_mut(first).unwrap().retried_as = Some(TaskId::from_ulid(Ulid::new()));
        assert_eq!(
            registry.latest_attempt(first),
            Some((first, TaskState::Cancelled))
        );
    }

    #[test]
    fn counts_and_filters_by_state() {
        let mut registry = TaskRegistry::new(10);
        registry.insert(task());
        let done = cancelled(&mut registry);

        let counts = registry.counts();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.cancelled, 1);
        assert_eq!(registry.ids_in(&[TaskState::Cancelled]), vec![done]);
    }
}
