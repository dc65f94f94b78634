//! synapse-core
//!
//! Task orchestration core for AI agents: prioritized submission, context
//! enrichment from long-term memory, bounded concurrent execution with
//! retries, and outcome recording.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, priority, task, state, metadata, errors, events）
//! - **ports**: 抽象化レイヤー（RecallStore, ResultRecorder, ExecutionStrategy, Clock, IdGenerator）
//! - **queue**: ready queue, worker slot, backoff
//! - **app**: Orchestrator とその部品（builder, scheduler, worker, enrich, recording）
//! - **typed**: 型付き Task API（TaskKind trait, Handler trait, HandlerRegistry）
//! - **impls**: 実装（MemoryBank など開発用）
//! - **config**: OrchestratorConfig（環境変数から読み込み）

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod typed;

pub use app::{BuildError, Orchestrator, OrchestratorBuilder, OrchestratorStats, SubmitRequest};
pub use config::OrchestratorConfig;
pub use domain::{
    ExecutionError, Memory, Metadata, OrchestratorError, Priority, TaskEvent, TaskId, TaskState,
    TaskStatus,
};
