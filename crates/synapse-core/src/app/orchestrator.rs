//! Orchestrator - the boundary surface and the task lifecycle.
//!
//! Control flow: submit -> enrich -> enqueue -> dispatch -> execute -> record.
//!
//! Locking:
//! - the task registry and the scheduler each sit behind their own
//!   `std::sync::Mutex`
//! - when both are needed the registry is locked first, never the reverse
//! - neither is held across an `.await`; recall, execution and recording all
//!   run outside of them

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::enrich::{Enricher, Enrichment};
use super::recording::{RecordingPolicy, record_with_retry};
use super::registry::{TaskEntry, TaskRegistry};
use super::scheduler::{Admission, Scheduler, SchedulerStats};
use super::worker::{TaskLifecycle, WorkerPool};
use crate::config::OrchestratorConfig;
use crate::domain::{
    ExecutionError, FailureKind, Metadata, OrchestratorError, OutcomeRecord, Priority,
    RecordStatus, SchedulerError, StateCounts, Task, TaskEvent, TaskId, TaskState, TaskStatus,
    WorkerId, validate_payload,
};
use crate::ports::{Clock, ExecutionRequest, IdGenerator, ResultRecorder};

/// Submission with an unparsed priority, as it arrives from an outer layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub payload: Value,

    /// `low | normal | high | critical`. Defaults to normal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,

    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorStats {
    pub tasks: StateCounts,
    pub scheduler: SchedulerStats,
}

pub(crate) struct Core {
    pub(crate) config: OrchestratorConfig,
    pub(crate) registry: Mutex<TaskRegistry>,
    pub(crate) scheduler: Arc<Scheduler>,
    pub(crate) enricher: Enricher,
    pub(crate) recorder: Arc<dyn ResultRecorder>,
    pub(crate) recording: RecordingPolicy,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) events: broadcast::Sender<TaskEvent>,
    pub(crate) runtime: Handle,
}

enum Resolved {
    Done(Value),
    RetriedAs(TaskId),
}

impl Core {
    fn registry(&self) -> MutexGuard<'_, TaskRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: TaskEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Create a pending task and start its admission pipeline.
    ///
    /// `retry_delay` marks a retry: it bypasses the queue bound and waits
    /// that long before enrichment.
    fn admit(
        self: &Arc<Self>,
        registry: &mut TaskRegistry,
        payload: Value,
        priority: Priority,
        metadata: Metadata,
        retry_delay: Option<Duration>,
    ) -> Result<TaskId, SchedulerError> {
        let admission = self.scheduler.reserve(retry_delay.is_some())?;
        let task_id = self.ids.generate_task_id();
        registry.insert(Task::new(
            task_id,
            payload,
            priority,
            metadata,
            self.clock.now(),
        ));
        self.emit(TaskEvent::Submitted { task_id, priority });

        let core = Arc::clone(self);
        self.runtime
            .spawn(async move { core.run_admission(task_id, admission, retry_delay).await });
        Ok(task_id)
    }

    async fn run_admission(
        self: Arc<Self>,
        task_id: TaskId,
        admission: Admission,
        delay: Option<Duration>,
    ) {
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let Some((payload, metadata)) = self.begin_enrichment(task_id) else {
            self.scheduler.release(admission);
            return;
        };
        let enrichment = self.enricher.enrich(&payload, &metadata).await;
        self.complete_admission(task_id, admission, enrichment);
    }

    fn begin_enrichment(&self, task_id: TaskId) -> Option<(Value, Metadata)> {
        let mut registry = self.registry();
        let entry = registry.get_mut(task_id)?;
        if entry.task.state() != TaskState::Pending {
            return None;
        }
        entry.task.begin_enrichment().ok()?;
        entry.publish_state();
        Some((entry.task.payload().clone(), entry.task.metadata().clone()))
    }

    fn complete_admission(
        self: &Arc<Self>,
        task_id: TaskId,
        admission: Admission,
        enrichment: Enrichment,
    ) {
        let mut registry = self.registry();
        let Some(entry) = registry.get_mut(task_id) else {
            self.scheduler.release(admission);
            return;
        };
        if entry.task.state() != TaskState::Enriching {
            // cancelled while recall was in progress
            self.scheduler.release(admission);
            return;
        }

        let recalled = enrichment.recalled_count();
        let recall_failed = enrichment.is_failed();
        if let Some(metadata) = entry.task.metadata_mut() {
            enrichment.apply(metadata);
        }
        self.emit(TaskEvent::Enriched {
            task_id,
            recalled,
            recall_failed,
        });

        if let Err(err) = entry.task.mark_queued() {
            tracing::error!(task_id = %task_id, error = %err, "cannot queue task");
            self.scheduler.release(admission);
            return;
        }
        entry.publish_state();
        let priority = entry.task.priority();

        match self.scheduler.enqueue(admission, task_id, priority) {
            Ok(()) => {
                tracing::debug!(task_id = %task_id, %priority, recalled, recall_failed, "task queued");
                self.emit(TaskEvent::Queued { task_id });
            }
            Err(err) => {
                tracing::debug!(task_id = %task_id, error = %err, "queue closed during admission");
                self.cancel_now(&mut registry, task_id);
            }
        }
    }

    /// Mark a non-terminal task cancelled right away.
    ///
    /// Returns false when the task is unknown or already terminal.
    fn cancel_now(self: &Arc<Self>, registry: &mut TaskRegistry, task_id: TaskId) -> bool {
        let Some(entry) = registry.get_mut(task_id) else {
            return false;
        };
        if entry.task.cancel(self.clock.now()).is_err() {
            return false;
        }
        entry.cancel.cancel();
        tracing::info!(task_id = %task_id, "task cancelled");
        self.settle(registry, task_id);
        true
    }

    /// Bookkeeping for a task that just became terminal.
    fn settle(self: &Arc<Self>, registry: &mut TaskRegistry, task_id: TaskId) {
        let Some(entry) = registry.get(task_id) else {
            return;
        };
        entry.publish_state();
        let outcome = OutcomeRecord::from_task(&entry.task);

        let event = match outcome.state {
            TaskState::Succeeded => TaskEvent::Succeeded { task_id },
            TaskState::Failed => TaskEvent::Failed {
                task_id,
                error: outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| ExecutionError::permanent("unknown failure")),
                exhausted_retries: outcome.exhausted_retries,
            },
            _ => TaskEvent::Cancelled { task_id },
        };
        self.emit(event);

        for evicted in registry.retire(task_id) {
            tracing::debug!(task_id = %evicted, "task evicted from retention window");
        }

        let core = Arc::clone(self);
        self.runtime.spawn(async move { core.record(outcome).await });
    }

    async fn record(self: Arc<Self>, outcome: OutcomeRecord) {
        let task_id = outcome.task_id;
        let status =
            record_with_retry(self.recorder.as_ref(), task_id, &outcome, &self.recording).await;

        let event = match &status {
            RecordStatus::Failed { reason } => TaskEvent::RecordFailed {
                task_id,
                reason: reason.clone(),
            },
            _ => TaskEvent::Recorded { task_id },
        };
        if let Some(entry) = self.registry().get_mut(task_id) {
            entry.record_status = status;
        }
        self.emit(event);
    }

    fn fail_or_retry(
        self: &Arc<Self>,
        registry: &mut TaskRegistry,
        task_id: TaskId,
        error: ExecutionError,
    ) {
        let Some(entry) = registry.get(task_id) else {
            return;
        };
        let attempt = entry.task.metadata().attempt;
        let budget = self.config.retry_budget;

        let mut retried_as = None;
        if error.retryable && attempt < budget {
            let payload = entry.task.payload().clone();
            let priority = entry.task.priority();
            let metadata = entry.task.metadata().for_retry(task_id);
            let delay = self.config.retry_backoff.next_delay(attempt);

            match self.admit(registry, payload, priority, metadata, Some(delay)) {
                Ok(retry) => {
                    tracing::info!(
                        task_id = %task_id,
                        retry = %retry,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "task failed, retrying"
                    );
                    self.emit(TaskEvent::Retried {
                        task_id,
                        retry,
                        delay_ms: delay.as_millis() as u64,
                    });
                    retried_as = Some(retry);
                }
                Err(err) => {
                    tracing::warn!(task_id = %task_id, error = %err, "retry not admitted");
                }
            }
        }

        let exhausted = error.retryable && attempt >= budget;
        if exhausted {
            tracing::warn!(task_id = %task_id, attempt, error = %error, "retry budget exhausted");
        } else if retried_as.is_none() {
            tracing::info!(task_id = %task_id, error = %error, "task failed");
        }

        let Some(entry) = registry.get_mut(task_id) else {
            return;
        };
        entry.retried_as = retried_as;
        if let Err(err) = entry.task.fail(error, exhausted, self.clock.now()) {
            tracing::error!(task_id = %task_id, error = %err, "cannot fail task");
            return;
        }
        self.settle(registry, task_id);
    }

    fn spawn_grace_timer(self: &Arc<Self>, task_id: TaskId) {
        let core = Arc::clone(self);
        let grace = self.config.cancel_grace;
        self.runtime.spawn(async move {
            tokio::time::sleep(grace).await;
            let mut registry = core.registry();
            let still_running = registry
                .get(task_id)
                .is_some_and(|e| e.task.state() == TaskState::Running);
            if still_running {
                tracing::warn!(task_id = %task_id, grace = ?grace, "task ignored cancellation, forcing cancelled");
                core.cancel_now(&mut registry, task_id);
            }
        });
    }

    fn resolve(&self, task_id: TaskId) -> Result<Resolved, OrchestratorError> {
        let registry = self.registry();
        let entry = registry
            .get(task_id)
            .ok_or(OrchestratorError::NotFound(task_id))?;
        match entry.task.state() {
            TaskState::Succeeded => Ok(Resolved::Done(
                entry.task.result().cloned().unwrap_or(Value::Null),
            )),
            TaskState::Failed => match entry.retried_as {
                Some(next) => Ok(Resolved::RetriedAs(next)),
                None => Err(OrchestratorError::TaskFailed {
                    task_id,
                    error: entry
                        .task
                        .error()
                        .cloned()
                        .unwrap_or_else(|| ExecutionError::permanent("unknown failure")),
                    exhausted_retries: entry.task.exhausted_retries(),
                }),
            },
            _ => Err(OrchestratorError::TaskCancelled(task_id)),
        }
    }
}

impl TaskLifecycle for Arc<Core> {
    fn begin(
        &self,
        task_id: TaskId,
        worker: WorkerId,
    ) -> Option<(ExecutionRequest, CancellationToken)> {
        let mut registry = self.registry();
        let entry = registry.get_mut(task_id)?;
        if entry.task.state() != TaskState::Queued {
            return None;
        }
        entry.task.start(self.clock.now()).ok()?;
        entry.publish_state();

        let request = ExecutionRequest {
            task_id,
            payload: entry.task.payload().clone(),
            metadata: entry.task.metadata().clone(),
            priority: entry.task.priority(),
        };
        let cancel = entry.cancel.clone();
        drop(registry);

        tracing::debug!(task_id = %task_id, worker = %worker, attempt = request.attempt(), "task dispatched");
        self.emit(TaskEvent::Dispatched { task_id, worker });
        Some((request, cancel))
    }

    fn finish(&self, task_id: TaskId, worker: WorkerId, result: Result<Value, ExecutionError>) {
        let mut registry = self.registry();
        let Some(entry) = registry.get_mut(task_id) else {
            return;
        };
        if entry.task.state() != TaskState::Running {
            tracing::debug!(task_id = %task_id, worker = %worker, "discarding late result");
            return;
        }

        let now = self.clock.now();
        let cancelled = entry.cancel_requested
            || matches!(&result, Err(err) if err.kind == FailureKind::Cancelled);
        if cancelled {
            self.cancel_now(&mut registry, task_id);
            return;
        }

        match result {
            Ok(output) => {
                if let Err(err) = entry.task.succeed(output, now) {
                    tracing::error!(task_id = %task_id, error = %err, "cannot complete task");
                    return;
                }
                tracing::info!(task_id = %task_id, worker = %worker, "task succeeded");
                self.settle(&mut registry, task_id);
            }
            Err(error) => self.fail_or_retry(&mut registry, task_id, error),
        }
    }

    fn worker_health_changed(&self, worker: WorkerId, healthy: bool) {
        let event = if healthy {
            TaskEvent::WorkerRecovered { worker }
        } else {
            TaskEvent::WorkerUnhealthy { worker }
        };
        self.emit(event);
    }
}

/// Entry point for submitting and tracking tasks.
///
/// Built with [`crate::app::OrchestratorBuilder`]. Dropping it without
/// calling [`Orchestrator::shutdown`] stops the workers without draining.
pub struct Orchestrator {
    core: Arc<Core>,
    workers: Mutex<Option<WorkerPool>>,
}

impl Orchestrator {
    pub(crate) fn new(core: Arc<Core>, workers: WorkerPool) -> Self {
        Self {
            core,
            workers: Mutex::new(Some(workers)),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.core.config
    }

    /// Accept a task. Never waits: enrichment and queuing continue in the
    /// background.
    ///
    /// # Errors
    /// - `Validation` for an empty payload or reserved metadata keys
    /// - `CapacityExceeded` when the ready queue is full
    /// - `ShuttingDown` after `shutdown` started
    pub fn submit(
        &self,
        payload: Value,
        priority: Priority,
        metadata: BTreeMap<String, Value>,
    ) -> Result<TaskId, OrchestratorError> {
        validate_payload(&payload)?;
        let metadata = Metadata::from_submission(metadata)?;

        let mut registry = self.core.registry();
        let task_id = self
            .core
            .admit(&mut registry, payload, priority, metadata, None)?;
        drop(registry);

        tracing::debug!(task_id = %task_id, %priority, "task submitted");
        Ok(task_id)
    }

    /// [`Orchestrator::submit`] with the priority given as a string.
    pub fn submit_request(&self, request: SubmitRequest) -> Result<TaskId, OrchestratorError> {
        let priority = match request.priority.as_deref() {
            None => Priority::default(),
            Some(raw) => raw.parse::<Priority>()?,
        };
        self.submit(request.payload, priority, request.metadata)
    }

    pub fn status(&self, task_id: TaskId) -> Result<TaskStatus, OrchestratorError> {
        self.core
            .registry()
            .get(task_id)
            .map(TaskEntry::status)
            .ok_or(OrchestratorError::NotFound(task_id))
    }

    /// Request cancellation. Returns the state right after the request.
    ///
    /// Tasks that have not started are cancelled immediately. A running task
    /// gets its cancellation token signalled and stays `running` until the
    /// worker reports back or `cancel_grace` runs out. Terminal tasks are left
    /// as they are, except a failed task that was retried: the request then
    /// applies to the latest retry.
    pub fn cancel(&self, task_id: TaskId) -> Result<TaskState, OrchestratorError> {
        let core = &self.core;
        let mut registry = core.registry();
        let (task_id, state) = registry
            .latest_attempt(task_id)
            .ok_or(OrchestratorError::NotFound(task_id))?;

        match state {
            TaskState::Pending | TaskState::Enriching => {
                core.cancel_now(&mut registry, task_id);
                Ok(TaskState::Cancelled)
            }
            TaskState::Queued => {
                // false means a worker already leased it; begin() will skip it
                core.scheduler.withdraw(task_id);
                core.cancel_now(&mut registry, task_id);
                Ok(TaskState::Cancelled)
            }
            TaskState::Running => {
                if let Some(entry) = registry.get_mut(task_id)
                    && !entry.cancel_requested
                {
                    entry.cancel_requested = true;
                    entry.cancel.cancel();
                    tracing::info!(task_id = %task_id, "cancellation requested for running task");
                    core.spawn_grace_timer(task_id);
                }
                Ok(TaskState::Running)
            }
            terminal => Ok(terminal),
        }
    }

    /// Wait for the task's final result, following retries.
    ///
    /// Timing out has no effect on the task.
    pub async fn await_result(
        &self,
        task_id: TaskId,
        timeout: Duration,
    ) -> Result<Value, OrchestratorError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut current = task_id;
        loop {
            let mut state_rx = self
                .core
                .registry()
                .get(current)
                .map(TaskEntry::watch_state)
                .ok_or(OrchestratorError::NotFound(current))?;

            let finished = tokio::time::timeout_at(deadline, state_rx.wait_for(|s| s.is_terminal()))
                .await
                .map(|waited| waited.is_ok());
            match finished {
                Err(_) => return Err(OrchestratorError::Timeout(timeout)),
                Ok(false) => return Err(OrchestratorError::NotFound(current)),
                Ok(true) => {}
            }

            match self.core.resolve(current)? {
                Resolved::Done(value) => return Ok(value),
                Resolved::RetriedAs(next) => current = next,
            }
        }
    }

    /// Stop accepting work and drain.
    ///
    /// Pending, enriching and queued tasks are cancelled. Running tasks get up
    /// to `drain_timeout` to finish; after that they are cancelled and
    /// `DrainTimeout` lists them.
    pub async fn shutdown(&self, drain_timeout: Duration) -> Result<(), OrchestratorError> {
        let core = &self.core;
        let withdrawn = core.scheduler.close();

        let cancelled = {
            let mut registry = core.registry();
            let waiting = registry.ids_in(&[
                TaskState::Pending,
                TaskState::Enriching,
                TaskState::Queued,
            ]);
            for task_id in &waiting {
                core.cancel_now(&mut registry, *task_id);
            }
            waiting.len()
        };
        tracing::info!(
            withdrawn = withdrawn.len(),
            cancelled,
            drain_timeout = ?drain_timeout,
            "shutting down, draining in-flight tasks"
        );

        let drained = core.scheduler.wait_idle(drain_timeout).await;
        let workers = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match drained {
            Ok(()) => {
                if let Some(workers) = workers {
                    workers.shutdown_and_join().await;
                }
                tracing::info!("shutdown complete");
                Ok(())
            }
            Err(in_flight) => {
                // in_flight may hold tasks that already settled
                let still_running: Vec<TaskId> = {
                    let mut registry = core.registry();
                    in_flight
                        .into_iter()
                        .filter(|task_id| {
                            if let Some(entry) = registry.get_mut(*task_id) {
                                entry.cancel_requested = true;
                            }
                            core.cancel_now(&mut registry, *task_id)
                        })
                        .collect()
                };
                if let Some(workers) = workers {
                    workers.request_shutdown();
                }
                tracing::error!(
                    still_running = still_running.len(),
                    "drain timed out, remaining tasks cancelled"
                );
                Err(OrchestratorError::DrainTimeout { still_running })
            }
        }
    }

    /// Lifecycle event stream. Slow receivers lag rather than block.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.core.events.subscribe()
    }

    pub fn stats(&self) -> OrchestratorStats {
        let tasks = self.core.registry().counts();
        OrchestratorStats {
            tasks,
            scheduler: self.core.scheduler.stats(),
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        let workers = self
            .workers
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(workers) = workers {
            workers.request_shutdown();
        }
    }
}
