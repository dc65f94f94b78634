//! RecallStore port - long-term memory lookup used during enrichment.

use async_trait::async_trait;

use crate::domain::errors::RecallError;
use crate::domain::memory::{Memory, RecallQuery};

/// Source of context snippets for a task.
///
/// Implementations must be idempotent and free of side effects: the
/// orchestrator may call `query` again for a retry of the same payload and may
/// abandon a call on timeout. Results are ordered by relevance, most relevant
/// first.
#[async_trait]
pub trait RecallStore: Send + Sync {
    async fn query(&self, query: &RecallQuery) -> Result<Vec<Memory>, RecallError>;
}

/// Recall store that never finds anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRecall;

#[async_trait]
impl RecallStore for NoRecall {
    async fn query(&self, _query: &RecallQuery) -> Result<Vec<Memory>, RecallError> {
        Ok(Vec::new())
    }
}
