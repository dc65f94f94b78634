//! Task metadata: a fixed set of recognized keys plus an open extension map.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::errors::ValidationError;
use super::ids::TaskId;
use super::memory::Memory;

/// Keys written by the orchestrator. Submitters may not set them.
pub const RESERVED_KEYS: [&str; 5] = [
    Metadata::RECALLED_CONTEXT,
    Metadata::RECALL_FAILED,
    Metadata::RECALL_ERROR,
    Metadata::RETRY_OF,
    Metadata::ATTEMPT,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Memories merged in by enrichment. `Some(vec![])` after a recall outage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recalled_context: Option<Vec<Memory>>,

    /// Soft-failure flag for the recall step.
    #[serde(default)]
    pub recall_failed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recall_error: Option<String>,

    /// Back-reference to the task this one retries. Non-owning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<TaskId>,

    /// 1 for the original submission, incremented per retry.
    #[serde(default = "first_attempt")]
    pub attempt: u32,

    /// Routing key for handler selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,

    /// Everything else the submitter attached.
    #[serde(flatten)]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

fn first_attempt() -> u32 {
    1
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            recalled_context: None,
            recall_failed: false,
            recall_error: None,
            retry_of: None,
            attempt: first_attempt(),
            task_type: None,
            extensions: BTreeMap::new(),
        }
    }
}

impl Metadata {
    pub const RECALLED_CONTEXT: &'static str = "recalled_context";
    pub const RECALL_FAILED: &'static str = "recall_failed";
    pub const RECALL_ERROR: &'static str = "recall_error";
    pub const RETRY_OF: &'static str = "retry_of";
    pub const ATTEMPT: &'static str = "attempt";
    pub const TASK_TYPE: &'static str = "task_type";

    /// Build metadata from a submitter's key-value bag.
    ///
    /// `task_type` must be a string. Reserved keys are rejected.
    pub fn from_submission(
        mut bag: BTreeMap<String, serde_json::Value>,
    ) -> Result<Self, ValidationError> {
        if let Some(key) = RESERVED_KEYS.iter().find(|k| bag.contains_key(**k)) {
            return Err(ValidationError::ReservedMetadataKey((*key).to_string()));
        }

        let task_type = match bag.remove(Self::TASK_TYPE) {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s),
            Some(other) => {
                return Err(ValidationError::InvalidMetadata {
                    key: Self::TASK_TYPE.to_string(),
                    reason: format!("expected a string, got {other}"),
                });
            }
        };

        Ok(Self {
            task_type,
            extensions: bag,
            ..Self::default()
        })
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    pub fn recalled(&self) -> &[Memory] {
        self.recalled_context.as_deref().unwrap_or_default()
    }

    /// Metadata for the next attempt: submitter keys carried over, recall
    /// results dropped so the retry is enriched afresh.
    pub fn for_retry(&self, original: TaskId) -> Self {
        Self {
            retry_of: Some(original),
            attempt: self.attempt + 1,
            task_type: self.task_type.clone(),
            extensions: self.extensions.clone(),
            ..Self::default()
        }
    }
}
