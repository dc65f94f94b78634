//! Recalled memory snippets and the query used to fetch them.

use serde::{Deserialize, Serialize};

/// One snippet returned by a Recall Store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub content: String,

    /// Where the snippet came from (a task id, a document path, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Store-defined relevance; higher is more relevant.
    #[serde(default)]
    pub relevance: f32,
}

impl Memory {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source: None,
            relevance: 0.0,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_relevance(mut self, relevance: f32) -> Self {
        self.relevance = relevance;
        self
    }
}

/// Input to [`crate::ports::RecallStore::query`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecallQuery {
    /// Projection of the task payload used as the lookup key.
    pub context_key: String,

    /// Upper bound on returned snippets.
    pub limit: usize,

    /// Routing hint copied from task metadata, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
}
