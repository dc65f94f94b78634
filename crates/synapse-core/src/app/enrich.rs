//! Enrichment - pulls recalled context for a task before it is queued.
//!
//! A recall outage never fails the task. It is recorded in metadata and the
//! task proceeds without context.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::domain::{Memory, Metadata, RecallError, RecallQuery};
use crate::ports::RecallStore;

/// Longest context key sent to the Recall Store, in characters.
pub const MAX_CONTEXT_KEY_CHARS: usize = 512;

/// Object fields tried, in order, when projecting a payload to a key.
const KEY_FIELDS: [&str; 4] = ["query", "prompt", "text", "content"];

/// Result of one enrichment attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Enrichment {
    Recalled(Vec<Memory>),
    Failed(RecallError),
}

impl Enrichment {
    pub fn recalled_count(&self) -> usize {
        match self {
            Enrichment::Recalled(memories) => memories.len(),
            Enrichment::Failed(_) => 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Enrichment::Failed(_))
    }

    /// Merge into task metadata.
    pub fn apply(self, metadata: &mut Metadata) {
        match self {
            Enrichment::Recalled(memories) => {
                metadata.recalled_context = Some(memories);
                metadata.recall_failed = false;
                metadata.recall_error = None;
            }
            Enrichment::Failed(err) => {
                metadata.recalled_context = Some(Vec::new());
                metadata.recall_failed = true;
                metadata.recall_error = Some(err.to_string());
            }
        }
    }
}

pub struct Enricher {
    store: Arc<dyn RecallStore>,
    timeout: Duration,
    max_recalled: usize,
}

impl Enricher {
    pub fn new(store: Arc<dyn RecallStore>, timeout: Duration, max_recalled: usize) -> Self {
        Self {
            store,
            timeout,
            max_recalled,
        }
    }

    pub async fn enrich(&self, payload: &Value, metadata: &Metadata) -> Enrichment {
        let query = RecallQuery {
            context_key: context_key(payload),
            limit: self.max_recalled,
            task_type: metadata.task_type.clone(),
        };

        match tokio::time::timeout(self.timeout, self.store.query(&query)).await {
            Ok(Ok(mut memories)) => {
                memories.truncate(self.max_recalled);
                Enrichment::Recalled(memories)
            }
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "recall failed, continuing without context");
                Enrichment::Failed(err)
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "recall timed out, continuing without context");
                Enrichment::Failed(RecallError::Timeout(self.timeout))
            }
        }
    }
}

/// Project a payload onto the string used as the recall lookup key.
pub fn context_key(payload: &Value) -> String {
    let key = match payload {
        Value::String(s) => s.clone(),
        Value::Object(fields) => KEY_FIELDS
            .iter()
            .find_map(|k| fields.get(*k).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| payload.to_string()),
        other => other.to_string(),
    };
    truncate_chars(key, MAX_CONTEXT_KEY_CHARS)
}

fn truncate_chars(mut s: String, max: usize) -> String {
    if let Some((idx, _)) = s.char_indices().nth(max) {
        s.truncate(idx);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rstest::rstest;
    use serde_json::json;

    struct Fixed(Vec<Memory>);

    #[async_trait]
    impl RecallStore for Fixed {
        async fn query(&self, _query: &RecallQuery) -> Result<Vec<Memory>, RecallError> {
            Ok(self.0.clone())
        }
    }

    struct Down;

    #[async_trait]
    impl RecallStore for Down {
        async fn query(&self, _query: &RecallQuery) -> Result<Vec<Memory>, RecallError> {
            Err(RecallError::Unavailable("connection refused".to_string()))
        }
    }

    struct Hangs;

    #[async_trait]
    impl RecallStore for Hangs {
        async fn query(&self, _query: &RecallQuery) -> Result<Vec<Memory>, RecallError> {
            std::future::pending().await
        }
    }

    #[rstest]
    #[case::string(json!("plain prompt"), "plain prompt")]
    #[case::query_field(json!({"query": "q", "prompt": "p"}), "q")]
    #[case::prompt_field(json!({"prompt": "p", "n": 1}), "p")]
    #[case::fallback(json!({"n": 1}), "{\"n\":1}")]
    #[case::number(json!(42), "42")]
    fn context_key_projection(#[case] payload: Value, #[case] expected: &str) {
        assert_eq!(context_key(&payload), expected);
    }

    #[test]
    fn context_key_is_truncated_on_char_boundary() {
        let long = "é".repeat(MAX_CONTEXT_KEY_CHARS + 10);
        let key = context_key(&json!(long));
        assert_eq!(key.chars().count(), MAX_CONTEXT_KEY_CHARS);
    }

    #[tokio::test]
    async fn recalled_memories_are_capped() {
        let memories = (0..5).map(|i| Memory::new(format!("m{i}"))).collect();
        let enricher = Enricher::new(Arc::new(Fixed(memories)), Duration::from_secs(1), 2);

        let enrichment = enricher.enrich(&json!("x"), &Metadata::default()).await;
        assert_eq!(enrichment.recalled_count(), 2);

        let mut meta = Metadata::default();
        enrichment.apply(&mut meta);
        assert_eq!(meta.recalled().len(), 2);
        assert!(!meta.recall_failed);
    }

    #[tokio::test]
    async fn outage_is_a_soft_failure() {
        let enricher = Enricher::new(Arc::new(Down), Duration::from_secs(1), 8);
        let enrichment = enricher.enrich(&json!("x"), &Metadata::default()).await;
        assert!(enrichment.is_failed());

        let mut meta = Metadata::default();
        enrichment.apply(&mut meta);
        assert!(meta.recall_failed);
        assert_eq!(meta.recalled_context, Some(Vec::new()));
        assert!(meta.recall_error.unwrap().contains("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_store_times_out() {
        let enricher = Enricher::new(Arc::new(Hangs), Duration::from_millis(200), 8);
        let enrichment = enricher.enrich(&json!("x"), &Metadata::default()).await;
        assert_eq!(
            enrichment,
            Enrichment::Failed(RecallError::Timeout(Duration::from_millis(200)))
        );
    }
}
