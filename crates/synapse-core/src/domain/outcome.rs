//! Outcome record: what the Result Recorder receives for a finished task.
//!
//! This is a detached snapshot. The recorder never sees the live task and the
//! registry may evict the task while recording is still in progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::ExecutionError;
use super::ids::TaskId;
use super::metadata::Metadata;
use super::priority::Priority;
use super::state::TaskState;
use super::task::Task;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub task_id: TaskId,

    /// Always terminal.
    pub state: TaskState,

    pub priority: Priority,
    pub payload: Value,
    pub metadata: Metadata,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,

    #[serde(default)]
    pub exhausted_retries: bool,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl OutcomeRecord {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id(),
            state: task.state(),
            priority: task.priority(),
            payload: task.payload().clone(),
            metadata: task.metadata().clone(),
            result: task.result().cloned(),
            error: task.error().cloned(),
            exhausted_retries: task.exhausted_retries(),
            created_at: task.created_at(),
            started_at: task.started_at(),
            finished_at: task.finished_at(),
        }
    }

    pub fn attempt(&self) -> u32 {
        self.metadata.attempt
    }

    pub fn succeeded(&self) -> bool {
        self.state == TaskState::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use ulid::Ulid;

    #[test]
    fn snapshot_copies_terminal_fields() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut task = Task::new(
            TaskId::from_ulid(Ulid::new()),
            json!("summarize the logs"),
            Priority::High,
            Metadata::default().with_task_type("summarize"),
            now,
        );
        task.begin_enrichment().unwrap();
        task.mark_queued().unwrap();
        task.start(now).unwrap();
        task.succeed(json!({"summary": "ok"}), now).unwrap();

        let record = OutcomeRecord::from_task(&task);
        assert!(record.succeeded());
        assert_eq!(record.attempt(), 1);
        assert_eq!(record.result, Some(json!({"summary": "ok"})));
        assert!(record.error.is_none());

        let v = serde_json::to_value(&record).unwrap();
        assert_eq!(v["state"], json!("succeeded"));
        assert!(v.get("error").is_none());
    }
}
