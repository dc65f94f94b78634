//! Worker pool - one tokio task per worker.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::scheduler::{Lease, Scheduler, WorkerReport};
use crate::domain::{ExecutionError, TaskId, WorkerId};
use crate::ports::{ExecutionRequest, ExecutionStrategy};

/// The orchestrator side of a task execution, as seen by a worker.
pub trait TaskLifecycle: Send + Sync {
    /// Move the task to running and hand out what the strategy needs.
    ///
    /// `None` means the task is no longer runnable (cancelled while queued)
    /// and must be skipped.
    fn begin(
        &self,
        task_id: TaskId,
        worker: WorkerId,
    ) -> Option<(ExecutionRequest, CancellationToken)>;

    /// Apply the strategy's result to the task.
    fn finish(&self, task_id: TaskId, worker: WorkerId, result: Result<Value, ExecutionError>);

    /// Health changes, for observability.
    fn worker_health_changed(&self, _worker: WorkerId, _healthy: bool) {}
}

/// Worker pool handle.
/// - `request_shutdown()` でワーカー全体が止まる（実行中の task は最後まで走る）
/// - `shutdown_and_join()` で全ワーカーの終了を待てる
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `n` workers.
    pub fn spawn(
        n: usize,
        scheduler: Arc<Scheduler>,
        lifecycle: Arc<dyn TaskLifecycle>,
        strategy: Arc<dyn ExecutionStrategy>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for i in 0..n {
            let worker = Worker {
                id: WorkerId(i),
                scheduler: Arc::clone(&scheduler),
                lifecycle: Arc::clone(&lifecycle),
                strategy: Arc::clone(&strategy),
            };
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker.run(&mut rx).await;
            });
            joins.push(join);
        }

        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Stop taking new leases. In-flight executions are not interrupted.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
    }
}

struct Worker {
    id: WorkerId,
    scheduler: Arc<Scheduler>,
    lifecycle: Arc<dyn TaskLifecycle>,
    strategy: Arc<dyn ExecutionStrategy>,
}

impl Worker {
    async fn run(self, shutdown_rx: &mut watch::Receiver<bool>) {
        tracing::debug!(worker = %self.id, "worker started");
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            // lease は待つ可能性があるので select で shutdown と競合させる
            let lease = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                lease = self.scheduler.lease(self.id) => lease,
            };

            match lease {
                Lease::Task(task_id) => self.run_task(task_id).await,
                Lease::Probe => self.probe().await,
            }
        }
        tracing::debug!(worker = %self.id, "worker stopped");
    }

    async fn run_task(&self, task_id: TaskId) {
        let Some((request, cancel)) = self.lifecycle.begin(task_id, self.id) else {
            tracing::debug!(worker = %self.id, task_id = %task_id, "skipping task that is no longer queued");
            self.scheduler.complete(self.id, task_id, WorkerReport::Healthy);
            return;
        };

        // strategy の panic は worker を巻き込まないよう別 task で実行する
        let strategy = Arc::clone(&self.strategy);
        let handle = tokio::spawn(async move { strategy.execute(request, cancel).await });
        let result = match handle.await {
            Ok(result) => result,
            Err(join_err) => {
                tracing::error!(worker = %self.id, task_id = %task_id, error = %join_err, "execution aborted");
                Err(ExecutionError::infrastructure(format!("execution aborted: {join_err}")))
            }
        };

        let report = match &result {
            Err(err) if err.is_infrastructure() => {
                tracing::warn!(worker = %self.id, task_id = %task_id, error = %err, "worker fault, leaving rotation");
                WorkerReport::Fault
            }
            _ => WorkerReport::Healthy,
        };

        self.lifecycle.finish(task_id, self.id, result);
        self.scheduler.complete(self.id, task_id, report);
        if report == WorkerReport::Fault {
            self.lifecycle.worker_health_changed(self.id, false);
        }
    }

    async fn probe(&self) {
        let ok = match self.strategy.probe().await {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(worker = %self.id, error = %err, "recovery probe failed");
                false
            }
        };
        if self.scheduler.probe_result(self.id, ok) {
            tracing::info!(worker = %self.id, "worker recovered");
            self.lifecycle.worker_health_changed(self.id, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::scheduler::SchedulerConfig;
    use crate::domain::{Metadata, Priority};
    use crate::queue::RetryPolicy;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use ulid::Ulid;

    #[derive(Default)]
    struct Recording {
        finished: Mutex<Vec<(TaskId, Result<Value, ExecutionError>)>>,
        skip: Mutex<Vec<TaskId>>,
        health: Mutex<Vec<bool>>,
    }

    impl TaskLifecycle for Recording {
        fn begin(
            &self,
            task_id: TaskId,
            _worker: WorkerId,
        ) -> Option<(ExecutionRequest, CancellationToken)> {
            if self.skip.lock().unwrap().contains(&task_id) {
                return None;
            }
            let request = ExecutionRequest {
                task_id,
                payload: Value::from("payload"),
                metadata: Metadata::default(),
                priority: Priority::Normal,
            };
            Some((request, CancellationToken::new()))
        }

        fn finish(&self, task_id: TaskId, _worker: WorkerId, result: Result<Value, ExecutionError>) {
            self.finished.lock().unwrap().push((task_id, result));
        }

        fn worker_health_changed(&self, _worker: WorkerId, healthy: bool) {
            self.health.lock().unwrap().push(healthy);
        }
    }

    struct Echo;

    #[async_trait]
    impl ExecutionStrategy for Echo {
        async fn execute(
            &self,
            request: ExecutionRequest,
            _cancel: CancellationToken,
        ) -> Result<Value, ExecutionError> {
            Ok(request.payload)
        }
    }

    /// Faults once, then behaves.
    struct FlakyInfra {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ExecutionStrategy for FlakyInfra {
        async fn execute(
            &self,
            _request: ExecutionRequest,
            _cancel: CancellationToken,
        ) -> Result<Value, ExecutionError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ExecutionError::infrastructure("gpu lost"))
            } else {
                Ok(Value::Bool(true))
            }
        }
    }

    struct Panics;

    #[async_trait]
    impl ExecutionStrategy for Panics {
        async fn execute(
            &self,
            _request: ExecutionRequest,
            _cancel: CancellationToken,
        ) -> Result<Value, ExecutionError> {
            panic!("boom");
        }
    }

    fn scheduler(workers: usize) -> Arc<Scheduler> {
        Arc::new(Scheduler::new(SchedulerConfig {
            worker_count: workers,
            capacity: 16,
            aging_threshold: Duration::from_secs(30),
            probe_backoff: RetryPolicy::new(
                Duration::from_millis(10),
                2.0,
                Duration::from_millis(100),
            ),
        }))
    }

    fn enqueue(s: &Scheduler) -> TaskId {
        let id = TaskId::from_ulid(Ulid::new());
        let admission = s.reserve(false).unwrap();
        s.enqueue(admission, id, Priority::Normal).unwrap();
        id
    }

    async fn wait_finished(lifecycle: &Recording, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while lifecycle.finished.lock().unwrap().len() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn workers_execute_and_report() {
        let s = scheduler(2);
        let lifecycle = Arc::new(Recording::default());
        let pool = WorkerPool::spawn(2, Arc::clone(&s), lifecycle.clone(), Arc::new(Echo));
        assert_eq!(pool.len(), 2);

        let a = enqueue(&s);
        let b = enqueue(&s);
        wait_finished(&lifecycle, 2).await;
        s.wait_idle(Duration::from_secs(1)).await.unwrap();

        let finished = lifecycle.finished.lock().unwrap().clone();
        let mut ids: Vec<TaskId> = finished.iter().map(|(id, _)| *id).collect();
        ids.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(ids, expected);
        assert!(finished.iter().all(|(_, r)| r == &Ok(Value::from("payload"))));

        pool.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn skipped_task_frees_the_slot() {
        let s = scheduler(1);
        let lifecycle = Arc::new(Recording::default());
        let skipped = TaskId::from_ulid(Ulid::new());
        lifecycle.skip.lock().unwrap().push(skipped);
        let admission = s.reserve(false).unwrap();
        s.enqueue(admission, skipped, Priority::High).unwrap();
        let runs = enqueue(&s);

        let pool = WorkerPool::spawn(1, Arc::clone(&s), lifecycle.clone(), Arc::new(Echo));
        wait_finished(&lifecycle, 1).await;

        assert_eq!(lifecycle.finished.lock().unwrap()[0].0, runs);
        pool.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn infrastructure_fault_triggers_probe_and_recovery() {
        let s = scheduler(1);
        let lifecycle = Arc::new(Recording::default());
        let strategy = Arc::new(FlakyInfra {
            calls: AtomicU32::new(0),
        });
        let pool = WorkerPool::spawn(1, Arc::clone(&s), lifecycle.clone(), strategy);

        enqueue(&s);
        wait_finished(&lifecycle, 1).await;
        enqueue(&s);
        wait_finished(&lifecycle, 2).await;

        let finished = lifecycle.finished.lock().unwrap().clone();
        assert!(finished[0].1.as_ref().unwrap_err().is_infrastructure());
        assert_eq!(finished[1].1, Ok(Value::Bool(true)));
        assert_eq!(*lifecycle.health.lock().unwrap(), vec![false, true]);

        pool.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn panicking_strategy_becomes_infrastructure_error() {
        let s = scheduler(1);
        let lifecycle = Arc::new(Recording::default());
        let pool = WorkerPool::spawn(1, Arc::clone(&s), lifecycle.clone(), Arc::new(Panics));

        enqueue(&s);
        wait_finished(&lifecycle, 1).await;

        let finished = lifecycle.finished.lock().unwrap().clone();
        assert!(finished[0].1.as_ref().unwrap_err().is_infrastructure());
        pool.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn idle_workers_stop_on_shutdown() {
        let s = scheduler(3);
        let pool = WorkerPool::spawn(
            3,
            Arc::clone(&s),
            Arc::new(Recording::default()),
            Arc::new(Echo),
        );
        tokio::time::timeout(Duration::from_secs(1), pool.shutdown_and_join())
            .await
            .unwrap();
    }
}
