//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **OrchestratorBuilder**: 構築とワイヤリング、fail-fast 検証
//! - **Orchestrator**: submit / status / cancel / await_result / shutdown の表面
//! - **Scheduler**: ready queue（優先度 + aging）と worker slot の管理
//! - **WorkerPool**: lease → execute → finish のループ
//! - **Enricher**: Recall Store からの context 取得（soft failure）
//! - **recording**: Result Recorder への記録と再試行

pub mod builder;
pub mod enrich;
pub mod orchestrator;
pub mod recording;
pub(crate) mod registry;
pub mod scheduler;
pub mod worker;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, OrchestratorBuilder};
pub use self::enrich::{Enricher, Enrichment};
pub use self::orchestrator::{Orchestrator, OrchestratorStats, SubmitRequest};
pub use self::recording::RecordingPolicy;
pub use self::scheduler::{Lease, Scheduler, SchedulerConfig, SchedulerStats, WorkerReport};
pub use self::worker::{TaskLifecycle, WorkerPool};
