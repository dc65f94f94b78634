//! Task record: the single source of truth for one unit of work.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::errors::{ExecutionError, TransitionError, ValidationError};
use super::ids::TaskId;
use super::metadata::Metadata;
use super::priority::Priority;
use super::state::TaskState;

/// Reject payloads that carry nothing to process.
pub fn validate_payload(payload: &Value) -> Result<(), ValidationError> {
    let empty = match payload {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    };
    if empty {
        Err(ValidationError::EmptyPayload)
    } else {
        Ok(())
    }
}

/// One unit of submitted work.
///
/// Design:
/// - `id`, `payload` and `priority` never change after creation.
/// - All state transitions go through methods that check
///   [`TaskState::can_transition_to`].
/// - Timestamps and `result`/`error` are written once; timestamps are clamped
///   so that `created_at <= started_at <= finished_at`.
#[derive(Debug, Clone)]
pub struct Task {
    id: TaskId,
    payload: Value,
    priority: Priority,
    metadata: Metadata,
    state: TaskState,

    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,

    result: Option<Value>,
    error: Option<ExecutionError>,

    /// Set when the last allowed attempt failed with a retryable error.
    exhausted_retries: bool,
}

impl Task {
    pub fn new(
        id: TaskId,
        payload: Value,
        priority: Priority,
        metadata: Metadata,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            payload,
            priority,
            metadata,
            state: TaskState::Pending,
            created_at: now,
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
            exhausted_retries: false,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// `None` once the task has left the pending/enriching stages.
    pub fn metadata_mut(&mut self) -> Option<&mut Metadata> {
        if self.state.accepts_metadata_changes() {
            Some(&mut self.metadata)
        } else {
            None
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&ExecutionError> {
        self.error.as_ref()
    }

    pub fn exhausted_retries(&self) -> bool {
        self.exhausted_retries
    }

    fn transition(&mut self, to: TaskState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(to) {
            return Err(TransitionError {
                task_id: self.id,
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    pub fn begin_enrichment(&mut self) -> Result<(), TransitionError> {
        self.transition(TaskState::Enriching)
    }

    pub fn mark_queued(&mut self) -> Result<(), TransitionError> {
        self.transition(TaskState::Queued)
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(TaskState::Running)?;
        self.started_at = Some(now.max(self.created_at));
        Ok(())
    }

    pub fn succeed(&mut self, output: Value, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(TaskState::Succeeded)?;
        self.result = Some(output);
        self.stamp_finished(now);
        Ok(())
    }

    pub fn fail(
        &mut self,
        error: ExecutionError,
        exhausted_retries: bool,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.transition(TaskState::Failed)?;
        self.error = Some(error);
        self.exhausted_retries = exhausted_retries;
        self.stamp_finished(now);
        Ok(())
    }

    /// Cancel with no outcome. Any in-progress result is discarded by the caller.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(TaskState::Cancelled)?;
        self.stamp_finished(now);
        Ok(())
    }

    fn stamp_finished(&mut self, now: DateTime<Utc>) {
        let floor = self.started_at.unwrap_or(self.created_at);
        self.finished_at = Some(now.max(floor));
    }
}
