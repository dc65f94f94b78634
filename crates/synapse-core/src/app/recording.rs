//! Hands terminal outcomes to the Result Recorder, retrying transient
//! failures.

use crate::domain::{OutcomeRecord, RecordStatus, TaskId};
use crate::ports::{RecordAck, ResultRecorder};
use crate::queue::RetryPolicy;

#[derive(Debug, Clone)]
pub struct RecordingPolicy {
    /// Total `record` calls, the first one included.
    pub budget: u32,
    pub backoff: RetryPolicy,
}

/// Record `outcome`, retrying on nack or transient errors.
///
/// Never fails: the final state is returned as a [`RecordStatus`] and the
/// task's own outcome is unaffected.
pub async fn record_with_retry(
    recorder: &dyn ResultRecorder,
    task_id: TaskId,
    outcome: &OutcomeRecord,
    policy: &RecordingPolicy,
) -> RecordStatus {
    let budget = policy.budget.max(1);
    let mut last_reason = String::new();

    for attempt in 1..=budget {
        match recorder.record(task_id, outcome).await {
            Ok(RecordAck::Ack) => {
                tracing::debug!(task_id = %task_id, attempt, "outcome recorded");
                return RecordStatus::Recorded;
            }
            Ok(RecordAck::Nack(reason)) => {
                tracing::warn!(task_id = %task_id, attempt, %reason, "recorder nacked outcome");
                last_reason = format!("nacked: {reason}");
            }
            Err(err) if err.is_transient() => {
                tracing::warn!(task_id = %task_id, attempt, error = %err, "transient record failure");
                last_reason = err.to_string();
            }
            Err(err) => {
                tracing::error!(task_id = %task_id, error = %err, "recording failed permanently");
                return RecordStatus::Failed {
                    reason: err.to_string(),
                };
            }
        }

        if attempt < budget {
            tokio::time::sleep(policy.backoff.next_delay(attempt)).await;
        }
    }

    tracing::error!(
        task_id = %task_id,
        attempts = budget,
        reason = %last_reason,
        "giving up on recording outcome"
    );
    RecordStatus::Failed {
        reason: last_reason,
    }
}
