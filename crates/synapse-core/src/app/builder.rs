//! OrchestratorBuilder - wiring and start-up validation.
//!
//! # Fail-fast 設計
//! - 設定値は build() 時に検証する
//! - expect_task_types() で期待される task_type を登録し、
//!   build() 時に「期待集合 ⊆ 登録済み集合」をチェックする
//! - 不足があれば BuildError を返す

use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio::sync::broadcast;

use super::enrich::Enricher;
use super::orchestrator::{Core, Orchestrator};
use super::recording::RecordingPolicy;
use super::registry::TaskRegistry;
use super::scheduler::{Scheduler, SchedulerConfig};
use super::worker::{TaskLifecycle, WorkerPool};
use crate::config::OrchestratorConfig;
use crate::domain::ConfigError;
use crate::ports::{
    Clock, DiscardRecorder, ExecutionStrategy, IdGenerator, NoRecall, RecallStore,
    ResultRecorder, SystemClock, UlidGenerator,
};
use crate::typed::{Handler, HandlerRegistry, RegistryError, TaskKind};

/// Builds an [`Orchestrator`] and starts its workers.
///
/// # 使用例
/// ```ignore
/// let orchestrator = OrchestratorBuilder::new()
///     .config(OrchestratorConfig::from_env()?)
///     .recall_store(Arc::new(bank.clone()))
///     .register::<Summarize, _>(SummarizeHandler)?
///     .expect_task_types(&[Summarize::TYPE])
///     .build()?;
/// ```
///
/// Execution goes either through handlers added with
/// [`OrchestratorBuilder::register`] or through one custom
/// [`ExecutionStrategy`], not both.
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    handlers: HandlerRegistry,
    strategy: Option<Arc<dyn ExecutionStrategy>>,
    recall_store: Arc<dyn RecallStore>,
    recorder: Arc<dyn ResultRecorder>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    expected_task_types: Option<Vec<String>>,
}

/// BuildError は構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no execution strategy: register a handler or set a strategy")]
    MissingStrategy,

    #[error("both handlers and a custom execution strategy were configured")]
    ConflictingStrategy,

    #[error("build() must be called from within a tokio runtime")]
    NoRuntime,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: OrchestratorConfig::default(),
            handlers: HandlerRegistry::new(),
            strategy: None,
            recall_store: Arc::new(NoRecall),
            recorder: Arc::new(DiscardRecorder),
            clock: None,
            ids: None,
            expected_task_types: None,
        }
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn recall_store(mut self, store: Arc<dyn RecallStore>) -> Self {
        self.recall_store = store;
        self
    }

    pub fn result_recorder(mut self, recorder: Arc<dyn ResultRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Use a custom strategy instead of typed handlers.
    pub fn strategy(mut self, strategy: Arc<dyn ExecutionStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Handler を登録
    pub fn register<T: TaskKind, H: Handler<T> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.handlers.register::<T, H>(handler)?;
        Ok(self)
    }

    /// 期待される task_type のリストを設定
    pub fn expect_task_types(mut self, task_types: &[&str]) -> Self {
        self.expected_task_types = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    /// Validate, wire everything together and spawn the workers.
    pub fn build(self) -> Result<Orchestrator, BuildError> {
        self.config.validate()?;
        let runtime = Handle::try_current().map_err(|_| BuildError::NoRuntime)?;

        if let Some(expected) = &self.expected_task_types {
            let registered = self.handlers.registered_types();
            let missing: Vec<String> = expected
                .iter()
                .filter(|t| !registered.contains(*t))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing));
            }
        }

        let strategy: Arc<dyn ExecutionStrategy> = match self.strategy {
            Some(_) if !self.handlers.is_empty() => return Err(BuildError::ConflictingStrategy),
            Some(strategy) => strategy,
            None if self.handlers.is_empty() => return Err(BuildError::MissingStrategy),
            None => Arc::new(self.handlers),
        };

        let config = self.config;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));

        let scheduler = Arc::new(Scheduler::new(SchedulerConfig {
            worker_count: config.worker_count,
            capacity: config.queue_capacity,
            aging_threshold: config.aging_threshold,
            probe_backoff: config.probe_backoff.clone(),
        }));
        let (events, _) = broadcast::channel(config.event_buffer);

        let core = Arc::new(Core {
            registry: Mutex::new(TaskRegistry::new(config.retention_capacity)),
            scheduler: Arc::clone(&scheduler),
            enricher: Enricher::new(
                self.recall_store,
                config.enrichment_timeout,
                config.max_recalled,
            ),
            recorder: self.recorder,
            recording: RecordingPolicy {
                budget: config.record_retry_budget,
                backoff: config.record_backoff.clone(),
            },
            clock,
            ids,
            events,
            runtime,
            config,
        });

        let workers = {
            let _guard = core.runtime.enter();
            let lifecycle: Arc<dyn TaskLifecycle> = Arc::new(Arc::clone(&core));
            WorkerPool::spawn(core.config.worker_count, scheduler, lifecycle, strategy)
        };
        tracing::info!(
            workers = core.config.worker_count,
            queue_capacity = core.config.queue_capacity,
            "orchestrator started"
        );

        Ok(Orchestrator::new(core, workers))
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
