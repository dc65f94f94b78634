//! Error types and their classification.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ids::TaskId;
use super::state::TaskState;

/// Bad submission input. The caller's fault; no state changes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("payload is empty")]
    EmptyPayload,

    #[error("invalid priority: {0:?}")]
    InvalidPriority(String),

    #[error("metadata key {0:?} is reserved")]
    ReservedMetadataKey(String),

    #[error("invalid metadata value for {key:?}: {reason}")]
    InvalidMetadata { key: String, reason: String },
}

/// What caused an execution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The task's own content or logic failed.
    Task,
    /// The execution strategy itself faulted. Degrades the worker.
    Infrastructure,
    /// Execution stopped because cancellation was signalled.
    Cancelled,
}

/// Structured failure reported by an execution strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind:?} failure (retryable={retryable}): {message}")]
pub struct ExecutionError {
    pub kind: FailureKind,
    pub retryable: bool,
    pub message: String,
}

impl ExecutionError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Task,
            retryable: true,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Task,
            retryable: false,
            message: message.into(),
        }
    }

    /// Strategy fault. Retryable for the task since the content is not to blame.
    pub fn infrastructure(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Infrastructure,
            retryable: true,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: FailureKind::Cancelled,
            retryable: false,
            message: "cancelled".to_string(),
        }
    }

    pub fn is_infrastructure(&self) -> bool {
        self.kind == FailureKind::Infrastructure
    }
}

/// Recall Store failure. Always a soft failure for the task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecallError {
    #[error("recall store unavailable: {0}")]
    Unavailable(String),

    #[error("recall query timed out after {0:?}")]
    Timeout(Duration),
}

/// Result Recorder failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    /// Worth retrying.
    #[error("transient record failure: {0}")]
    Transient(String),

    #[error("permanent record failure: {0}")]
    Permanent(String),
}

impl RecordError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RecordError::Transient(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("task {task_id}: cannot transition from {from} to {to}")]
pub struct TransitionError {
    pub task_id: TaskId,
    pub from: TaskState,
    pub to: TaskState,
}

/// Admission failures from the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("ready queue is full (capacity {capacity})")]
    CapacityExceeded { capacity: usize },

    #[error("scheduler is shutting down")]
    ShuttingDown,
}

/// Errors surfaced at the orchestrator boundary.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrchestratorError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("ready queue is full (capacity {capacity})")]
    CapacityExceeded { capacity: usize },

    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("drain timed out with {} task(s) still running", .still_running.len())]
    DrainTimeout { still_running: Vec<TaskId> },

    #[error("orchestrator is shutting down")]
    ShuttingDown,

    #[error("task {task_id} failed: {error}")]
    TaskFailed {
        task_id: TaskId,
        error: ExecutionError,
        exhausted_retries: bool,
    },

    #[error("task {0} was cancelled")]
    TaskCancelled(TaskId),
}

impl From<SchedulerError> for OrchestratorError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::CapacityExceeded { capacity } => {
                OrchestratorError::CapacityExceeded { capacity }
            }
            SchedulerError::ShuttingDown => OrchestratorError::ShuttingDown,
        }
    }
}

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}
