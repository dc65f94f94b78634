//! Lifecycle events published on the orchestrator's broadcast channel.

use serde::{Deserialize, Serialize};

use super::errors::ExecutionError;
use super::ids::{TaskId, WorkerId};
use super::priority::Priority;

/// Something observable happened to a task or worker.
///
/// Events are best-effort: slow subscribers lag and lose old events; nothing
/// in the orchestrator waits on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    Submitted {
        task_id: TaskId,
        priority: Priority,
    },
    Enriched {
        task_id: TaskId,
        recalled: usize,
        recall_failed: bool,
    },
    Queued {
        task_id: TaskId,
    },
    Dispatched {
        task_id: TaskId,
        worker: WorkerId,
    },
    Succeeded {
        task_id: TaskId,
    },
    Failed {
        task_id: TaskId,
        error: ExecutionError,
        exhausted_retries: bool,
    },
    Retried {
        task_id: TaskId,
        retry: TaskId,
        delay_ms: u64,
    },
    Cancelled {
        task_id: TaskId,
    },
    Recorded {
        task_id: TaskId,
    },
    RecordFailed {
        task_id: TaskId,
        reason: String,
    },
    WorkerUnhealthy {
        worker: WorkerId,
    },
    WorkerRecovered {
        worker: WorkerId,
    },
}

impl TaskEvent {
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            TaskEvent::Submitted { task_id, .. }
            | TaskEvent::Enriched { task_id, .. }
            | TaskEvent::Queued { task_id }
            | TaskEvent::Dispatched { task_id, .. }
            | TaskEvent::Succeeded { task_id }
            | TaskEvent::Failed { task_id, .. }
            | TaskEvent::Retried { task_id, .. }
            | TaskEvent::Cancelled { task_id }
            | TaskEvent::Recorded { task_id }
            | TaskEvent::RecordFailed { task_id, .. } => Some(*task_id),
            TaskEvent::WorkerUnhealthy { .. } | TaskEvent::WorkerRecovered { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use ulid::Ulid;

    #[test]
    fn worker_events_have_no_task() {
        let e = TaskEvent::WorkerUnhealthy { worker: WorkerId(1) };
        assert_eq!(e.task_id(), None);
    }

    #[test]
    fn events_serialize_with_tag() {
        let id = TaskId::from_ulid(Ulid::new());
        let v = serde_json::to_value(TaskEvent::Queued { task_id: id }).unwrap();
        assert_eq!(v["event"], json!("queued"));
        assert_eq!(
            TaskEvent::Queued { task_id: id }.task_id(),
            Some(id)
        );
    }
}
