//! MemoryBank - 開発用の長期記憶
//!
//! RecallStore と ResultRecorder の両方を実装するので、成功した task の結果が
//! 後続 task の enrichment で recall される。
//!
//! # 実装詳細
//! - VecDeque<Entry> を Mutex で保護（lock は await を跨がない）
//! - 容量を超えたら古い entry から捨てる
//! - relevance は context key と content の token の重なり率

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::app::enrich::context_key;
use crate::domain::{Memory, OutcomeRecord, RecallError, RecallQuery, RecordError, TaskId};
use crate::ports::{RecallStore, RecordAck, ResultRecorder};

pub const DEFAULT_BANK_CAPACITY: usize = 4096;

#[derive(Debug, Clone)]
struct Entry {
    memory: Memory,
    task_type: Option<String>,
    recorded_from: Option<TaskId>,
    tokens: BTreeSet<String>,
}

/// In-process memory shared by clones.
///
/// # 使用例
/// ```ignore
/// let bank = MemoryBank::new();
/// let orchestrator = OrchestratorBuilder::new()
///     .recall_store(Arc::new(bank.clone()))
///     .result_recorder(Arc::new(bank.clone()))
///     .strategy(strategy)
///     .build()?;
/// ```
#[derive(Debug, Clone)]
pub struct MemoryBank {
    entries: Arc<Mutex<VecDeque<Entry>>>,
    capacity: usize,
}

impl MemoryBank {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BANK_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    /// Seed a memory directly, bypassing the recorder.
    pub fn remember(&self, memory: Memory, task_type: Option<String>) {
        self.push(Entry {
            tokens: tokenize(&memory.content),
            memory,
            task_type,
            recorded_from: None,
        });
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Oldest first.
    pub fn memories(&self) -> Vec<Memory> {
        self.lock().iter().map(|e| e.memory.clone()).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, entry: Entry) {
        let mut entries = self.lock();
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }
}

impl Default for MemoryBank {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecallStore for MemoryBank {
    async fn query(&self, query: &RecallQuery) -> Result<Vec<Memory>, RecallError> {
        let wanted = tokenize(&query.context_key);
        if wanted.is_empty() || query.limit == 0 {
            return Ok(Vec::new());
        }

        let entries = self.lock();
        // (relevance, recency) 降順
        let mut scored: Vec<(f32, usize, &Entry)> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| match (&query.task_type, &e.task_type) {
                (Some(want), Some(have)) => want == have,
                _ => true,
            })
            .filter_map(|(pos, e)| {
                let overlap = e.tokens.intersection(&wanted).count();
                (overlap > 0).then(|| (overlap as f32 / wanted.len() as f32, pos, e))
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(b.1.cmp(&a.1)));

        Ok(scored
            .into_iter()
            .take(query.limit)
            .map(|(relevance, _, e)| e.memory.clone().with_relevance(relevance))
            .collect())
    }
}

#[async_trait]
impl ResultRecorder for MemoryBank {
    /// Succeeded outcomes become memories; everything else is acknowledged and
    /// dropped. Re-recording the same task is a no-op.
    async fn record(
        &self,
        task_id: TaskId,
        outcome: &OutcomeRecord,
    ) -> Result<RecordAck, RecordError> {
        if !outcome.succeeded() {
            return Ok(RecordAck::Ack);
        }
        if self.lock().iter().any(|e| e.recorded_from == Some(task_id)) {
            return Ok(RecordAck::Ack);
        }

        let result = match &outcome.result {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let content = format!("{} => {}", context_key(&outcome.payload), result);
        let memory = Memory::new(content).with_source(task_id.to_string());

        self.push(Entry {
            tokens: tokenize(&memory.content),
            memory,
            task_type: outcome.metadata.task_type.clone(),
            recorded_from: Some(task_id),
        });
        tracing::debug!(task_id = %task_id, "outcome stored in memory bank");
        Ok(RecordAck::Ack)
    }
}

/// Lowercased alphanumeric words.
fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Metadata, Priority, Task};
    use chrono::Utc;
    use serde_json::json;
    use ulid::Ulid;

    fn query(key: &str, limit: usize) -> RecallQuery {
        RecallQuery {
            context_key: key.to_string(),
            limit,
            task_type: None,
        }
    }

    fn succeeded(payload: serde_json::Value, result: serde_json::Value) -> OutcomeRecord {
        let now = Utc::now();
        let mut task = Task::new(
            TaskId::from_ulid(Ulid::new()),
            payload,
            Priority::Normal,
            Metadata::default(),
            now,
        );
        task.begin_enrichment().unwrap();
        task.mark_queued().unwrap();
        task.start(now).unwrap();
        task.succeed(result, now).unwrap();
        OutcomeRecord::from_task(&task)
    }

    #[tokio::test]
    async fn test_query_ranks_by_overlap() {
        let bank = MemoryBank::new();
        bank.remember(Memory::new("rust borrow checker rules"), None);
        bank.remember(Memory::new("rust async runtime"), None);
        bank.remember(Memory::new("gardening tips"), None);

        let found = bank.query(&query("Rust borrow", 8)).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].content, "rust borrow checker rules");
        assert_eq!(found[0].relevance, 1.0);
        assert_eq!(found[1].relevance, 0.5);
    }

    #[tokio::test]
    async fn test_query_respects_limit_and_task_type() {
        let bank = MemoryBank::new();
        bank.remember(Memory::new("deploy notes"), Some("ops".to_string()));
        bank.remember(Memory::new("deploy checklist"), Some("docs".to_string()));
        bank.remember(Memory::new("deploy history"), None);

        let mut q = query("deploy", 8);
        q.task_type = Some("ops".to_string());
        let found = bank.query(&q).await.unwrap();
        let contents: Vec<_> = found.iter().map(|m| m.content.as_str()).collect();
        // ties broken by recency
        assert_eq!(contents, vec!["deploy history", "deploy notes"]);

        assert_eq!(bank.query(&query("deploy", 1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_recorded_outcomes_are_recallable() {
        let bank = MemoryBank::new();
        let outcome = succeeded(json!({"prompt": "capital of france"}), json!("paris"));

        assert_eq!(
            bank.record(outcome.task_id, &outcome).await.unwrap(),
            RecordAck::Ack
        );
        // idempotent per task
        bank.record(outcome.task_id, &outcome).await.unwrap();
        assert_eq!(bank.len(), 1);

        let found = bank.query(&query("france", 4)).await.unwrap();
        assert_eq!(found[0].content, "capital of france => paris");
        assert_eq!(found[0].source, Some(outcome.task_id.to_string()));
    }

    #[tokio::test]
    async fn test_failed_outcomes_are_not_stored() {
        let bank = MemoryBank::new();
        let now = Utc::now();
        let mut task = Task::new(
            TaskId::from_ulid(Ulid::new()),
            json!("x"),
            Priority::Normal,
            Metadata::default(),
            now,
        );
        task.cancel(now).unwrap();
        let outcome = OutcomeRecord::from_task(&task);

        assert_eq!(bank.record(task.id(), &outcome).await.unwrap(), RecordAck::Ack);
        assert!(bank.is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let bank = MemoryBank::with_capacity(2);
        bank.remember(Memory::new("a"), None);
        bank.remember(Memory::new("b"), None);
        bank.remember(Memory::new("c"), None);

        let contents: Vec<_> = bank.memories().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["b", "c"]);
    }
}
