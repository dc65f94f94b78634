//! ExecutionStrategy port - runs the actual work for a task.

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::ExecutionError;
use crate::domain::ids::TaskId;
use crate::domain::metadata::Metadata;
use crate::domain::priority::Priority;

/// Everything a strategy gets to see about the task it runs.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub task_id: TaskId,
    pub payload: Value,
    pub metadata: Metadata,
    pub priority: Priority,
}

impl ExecutionRequest {
    pub fn attempt(&self) -> u32 {
        self.metadata.attempt
    }

    pub fn task_type(&self) -> Option<&str> {
        self.metadata.task_type.as_deref()
    }
}

/// Pluggable executor.
///
/// `execute` should watch `cancel` and return
/// [`ExecutionError::cancelled`] promptly once it fires. Returning
/// [`ExecutionError::infrastructure`] marks the calling worker unhealthy until
/// [`ExecutionStrategy::probe`] succeeds.
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    async fn execute(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> Result<Value, ExecutionError>;

    /// Health check used to bring an unhealthy worker back.
    async fn probe(&self) -> Result<(), ExecutionError> {
        Ok(())
    }
}
