//! ResultRecorder port - persists terminal outcomes.

use async_trait::async_trait;

use crate::domain::errors::RecordError;
use crate::domain::ids::TaskId;
use crate::domain::outcome::OutcomeRecord;

/// Recorder's answer to a `record` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordAck {
    Ack,
    /// Not stored this time; the orchestrator will retry.
    Nack(String),
}

/// Receives one [`OutcomeRecord`] per terminal task.
///
/// May be called more than once for the same task when an earlier call was
/// nacked or failed transiently, so implementations should treat `task_id` as
/// an idempotency key.
#[async_trait]
pub trait ResultRecorder: Send + Sync {
    async fn record(
        &self,
        task_id: TaskId,
        outcome: &OutcomeRecord,
    ) -> Result<RecordAck, RecordError>;
}

/// Recorder that acknowledges and drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardRecorder;

#[async_trait]
impl ResultRecorder for DiscardRecorder {
    async fn record(
        &self,
        _task_id: TaskId,
        _outcome: &OutcomeRecord,
    ) -> Result<RecordAck, RecordError> {
        Ok(RecordAck::Ack)
    }
}
