//! Read-only views handed out at the orchestrator boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::ExecutionError;
use super::ids::TaskId;
use super::metadata::Metadata;
use super::priority::Priority;
use super::state::TaskState;
use super::task::Task;

/// Progress of handing a terminal outcome to the Result Recorder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordStatus {
    /// Not terminal yet, or recording still in progress.
    Pending,
    Recorded,
    /// Retries exhausted or a permanent recorder error.
    Failed { reason: String },
}

/// Snapshot returned by `Orchestrator::status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub state: TaskState,
    pub priority: Priority,
    pub metadata: Metadata,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,

    #[serde(default)]
    pub exhausted_retries: bool,

    /// The task created to retry this one, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retried_as: Option<TaskId>,

    /// A cancel was requested while the task was running and has not
    /// resolved yet.
    #[serde(default)]
    pub cancel_requested: bool,

    pub record_status: RecordStatus,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskStatus {
    pub fn from_task(
        task: &Task,
        retried_as: Option<TaskId>,
        cancel_requested: bool,
        record_status: RecordStatus,
    ) -> Self {
        Self {
            task_id: task.id(),
            state: task.state(),
            priority: task.priority(),
            metadata: task.metadata().clone(),
            result: task.result().cloned(),
            error: task.error().cloned(),
            exhausted_retries: task.exhausted_retries(),
            retried_as,
            cancel_requested,
            record_status,
            created_at: task.created_at(),
            started_at: task.started_at(),
            finished_at: task.finished_at(),
        }
    }
}

/// Number of retained tasks per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub pending: usize,
    pub enriching: usize,
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl StateCounts {
    pub fn add(&mut self, state: TaskState) {
        match state {
            TaskState::Pending => self.pending += 1,
            TaskState::Enriching => self.enriching += 1,
            TaskState::Queued => self.queued += 1,
            TaskState::Running => self.running += 1,
            TaskState::Succeeded => self.succeeded += 1,
            TaskState::Failed => self.failed += 1,
            TaskState::Cancelled => self.cancelled += 1,
        }
    }

    pub fn active(&self) -> usize {
        self.pending + self.enriching + self.queued + self.running
    }

    pub fn terminal(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }
}

impl FromIterator<TaskState> for StateCounts {
    fn from_iter<I: IntoIterator<Item = TaskState>>(iter: I) -> Self {
        let mut counts = Self::default();
        for state in iter {
            counts.add(state);
        }
        counts
    }
}
