//! Task state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a task.
///
/// State transitions:
/// - Pending -> Enriching -> Queued -> Running -> Succeeded | Failed | Cancelled
/// - Pending | Enriching | Queued -> Cancelled
///
/// Transitions never move backwards. A retry is a new task, not a reset of
/// this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Accepted, waiting for enrichment to start.
    Pending,

    /// Recall Store is being queried for context.
    Enriching,

    /// In the ready queue, eligible for dispatch.
    Queued,

    /// Assigned to a worker.
    Running,

    Succeeded,

    Failed,

    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Metadata may only change before the task reaches the ready queue.
    pub fn accepts_metadata_changes(self) -> bool {
        matches!(self, TaskState::Pending | TaskState::Enriching)
    }

    pub fn can_transition_to(self, target: TaskState) -> bool {
        use TaskState::*;

        matches!(
            (self, target),
            (Pending, Enriching)
                | (Pending, Cancelled)
                | (Enriching, Queued)
                | (Enriching, Cancelled)
                | (Queued, Running)
                | (Queued, Cancelled)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Enriching => "enriching",
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TaskState::Pending, TaskState::Enriching)]
    #[case(TaskState::Enriching, TaskState::Queued)]
    #[case(TaskState::Queued, TaskState::Running)]
    #[case(TaskState::Running, TaskState::Succeeded)]
    #[case(TaskState::Running, TaskState::Failed)]
    #[case(TaskState::Running, TaskState::Cancelled)]
    #[case(TaskState::Queued, TaskState::Cancelled)]
    #[case(TaskState::Pending, TaskState::Cancelled)]
    fn forward_transitions_are_allowed(#[case] from: TaskState, #[case] to: TaskState) {
        assert!(from.can_transition_to(to));
    }

    #[rstest]
    #[case::requeue(TaskState::Queued, TaskState::Pending)]
    #[case::skip_queue(TaskState::Pending, TaskState::Running)]
    #[case::regress(TaskState::Running, TaskState::Queued)]
    #[case::resurrect(TaskState::Failed, TaskState::Running)]
    #[case::terminal_swap(TaskState::Succeeded, TaskState::Failed)]
    #[case::cancel_terminal(TaskState::Succeeded, TaskState::Cancelled)]
    fn backward_or_skipping_transitions_are_rejected(
        #[case] from: TaskState,
        #[case] to: TaskState,
    ) {
        assert!(!from.can_transition_to(to));
    }

    #[test]
    fn terminal_states() {
        assert!(TaskState::Succeeded.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(!TaskState::Queued.is_terminal());
    }

    #[test]
    fn serializes_snake_case() {
        let json = serde_json::to_string(&TaskState::Enriching).unwrap();
        assert_eq!(json, "\"enriching\"");
    }
}
