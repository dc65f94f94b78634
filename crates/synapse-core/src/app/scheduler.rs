//! Scheduler - owns the ready queue and the worker slots.
//!
//! All scheduler state sits behind one `std::sync::Mutex`. Selection and
//! assignment happen in a single critical section, so a task is handed to at
//! most one worker. The lock is never held across an `.await`; waiting is done
//! on `Notify` outside of it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::domain::{Priority, SchedulerError, TaskId, WorkerId};
use crate::queue::{ReadyEntry, ReadyQueue, RetryPolicy, WorkerSlot};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub worker_count: usize,
    pub capacity: usize,
    pub aging_threshold: Duration,
    pub probe_backoff: RetryPolicy,
}

/// A reserved place in the ready queue.
///
/// Every admission must end in exactly one [`Scheduler::enqueue`] or
/// [`Scheduler::release`].
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct Admission {
    seq: u64,
}

impl Admission {
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// What a worker got from [`Scheduler::lease`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lease {
    Task(TaskId),
    /// The worker is unhealthy and its recovery probe is due.
    Probe,
}

/// How the worker came out of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerReport {
    Healthy,
    /// Infrastructure fault; the worker leaves rotation until a probe passes.
    Fault,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub capacity: usize,
    pub ready: usize,
    pub reserved: usize,
    pub in_flight: usize,
    pub busy_workers: usize,
    pub unhealthy_workers: usize,
    pub accepting: bool,
}

enum Attempt {
    Leased(Lease),
    WaitUntil(Instant),
    Wait,
}

struct SchedulerState {
    accepting: bool,
    ready: ReadyQueue,
    /// Admissions handed out but not yet enqueued or released.
    reserved: usize,
    slots: Vec<WorkerSlot>,
    in_flight: HashMap<TaskId, WorkerId>,
    next_seq: u64,
}

impl SchedulerState {
    fn try_lease(&mut self, worker: WorkerId, config: &SchedulerConfig) -> Attempt {
        let now = Instant::now();
        let Some(slot) = self.slots.get_mut(worker.0) else {
            return Attempt::Wait;
        };
        if slot.busy() {
            return Attempt::Wait;
        }
        if let Some(probe_at) = slot.next_probe_at() {
            if probe_at <= now {
                slot.start_probe();
                return Attempt::Leased(Lease::Probe);
            }
            return Attempt::WaitUntil(probe_at);
        }

        let Some(entry) = self.ready.pop_next(now, config.aging_threshold) else {
            return Attempt::Wait;
        };
        slot.assign(entry.task_id);
        self.in_flight.insert(entry.task_id, worker);
        Attempt::Leased(Lease::Task(entry.task_id))
    }

    fn stats(&self, capacity: usize) -> SchedulerStats {
        SchedulerStats {
            capacity,
            ready: self.ready.len(),
            reserved: self.reserved,
            in_flight: self.in_flight.len(),
            busy_workers: self.slots.iter().filter(|s| s.busy()).count(),
            unhealthy_workers: self.slots.iter().filter(|s| !s.is_healthy()).count(),
            accepting: self.accepting,
        }
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
    /// Signalled when ready entries appear.
    work_ready: Notify,
    /// Signalled when an in-flight task completes.
    progress: Notify,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let slots = (0..config.worker_count)
            .map(|i| WorkerSlot::new(WorkerId(i)))
            .collect();
        Self {
            state: Mutex::new(SchedulerState {
                accepting: true,
                ready: ReadyQueue::new(),
                reserved: 0,
                slots,
                in_flight: HashMap::new(),
                next_seq: 0,
            }),
            config,
            work_ready: Notify::new(),
            progress: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Reserve a ready-queue place and a submission sequence number.
    ///
    /// `bypass_capacity` skips the bound check (used for retries) but not the
    /// shutdown check.
    pub fn reserve(&self, bypass_capacity: bool) -> Result<Admission, SchedulerError> {
        let mut state = self.lock();
        if !state.accepting {
            return Err(SchedulerError::ShuttingDown);
        }
        if !bypass_capacity && state.ready.len() + state.reserved >= self.config.capacity {
            return Err(SchedulerError::CapacityExceeded {
                capacity: self.config.capacity,
            });
        }
        state.reserved += 1;
        let seq = state.next_seq;
        state.next_seq += 1;
        Ok(Admission { seq })
    }

    /// Turn a reservation into a ready entry.
    pub fn enqueue(
        &self,
        admission: Admission,
        task_id: TaskId,
        priority: Priority,
    ) -> Result<(), SchedulerError> {
        {
            let mut state = self.lock();
            state.reserved = state.reserved.saturating_sub(1);
            if !state.accepting {
                return Err(SchedulerError::ShuttingDown);
            }
            state.ready.push(ReadyEntry {
                task_id,
                priority,
                seq: admission.seq,
                enqueued_at: Instant::now(),
            });
        }
        self.work_ready.notify_waiters();
        Ok(())
    }

    /// Give a reservation back without enqueuing anything.
    pub fn release(&self, _admission: Admission) {
        let mut state = self.lock();
        state.reserved = state.reserved.saturating_sub(1);
    }

    /// Remove a queued task. `false` if it was not in the ready queue
    /// (already leased, or never enqueued).
    pub fn withdraw(&self, task_id: TaskId) -> bool {
        self.lock().ready.remove(task_id).is_some()
    }

    /// Wait for the next thing this worker should do.
    ///
    /// Cancel-safe: dropping the future before it resolves leaves no
    /// assignment behind.
    pub async fn lease(&self, worker: WorkerId) -> Lease {
        loop {
            let notified = self.work_ready.notified();
            tokio::pin!(notified);
            // register before checking so a concurrent enqueue is not missed
            notified.as_mut().enable();

            let attempt = self.lock().try_lease(worker, &self.config);
            match attempt {
                Attempt::Leased(lease) => return lease,
                Attempt::WaitUntil(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                Attempt::Wait => notified.await,
            }
        }
    }

    /// Free the worker's slot after running (or skipping) `task_id`.
    pub fn complete(&self, worker: WorkerId, task_id: TaskId, report: WorkerReport) {
        {
            let mut state = self.lock();
            state.in_flight.remove(&task_id);
            if let Some(slot) = state.slots.get_mut(worker.0) {
                slot.release();
                if report == WorkerReport::Fault {
                    slot.mark_fault(Instant::now(), &self.config.probe_backoff);
                }
            }
        }
        self.progress.notify_waiters();
    }

    /// Returns true when the worker is healthy again.
    pub fn probe_result(&self, worker: WorkerId, ok: bool) -> bool {
        let mut state = self.lock();
        match state.slots.get_mut(worker.0) {
            Some(slot) => slot.finish_probe(ok, Instant::now(), &self.config.probe_backoff),
            None => false,
        }
    }

    /// Stop admitting work and empty the ready queue.
    ///
    /// Returns the withdrawn tasks in submission order. Reservations still
    /// outstanding fail at `enqueue`.
    pub fn close(&self) -> Vec<TaskId> {
        let withdrawn = {
            let mut state = self.lock();
            state.accepting = false;
            state.ready.drain()
        };
        self.work_ready.notify_waiters();
        withdrawn.into_iter().map(|e| e.task_id).collect()
    }

    pub fn is_accepting(&self) -> bool {
        self.lock().accepting
    }

    pub fn in_flight(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.lock().in_flight.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Wait until no task is in flight.
    ///
    /// On timeout returns the tasks still running.
    pub async fn wait_idle(&self, timeout: Duration) -> Result<(), Vec<TaskId>> {
        let wait = async {
            loop {
                let notified = self.progress.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.lock().in_flight.is_empty() {
                    return;
                }
                notified.await;
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(()) => Ok(()),
            Err(_) => Err(self.in_flight()),
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        self.lock().stats(self.config.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use ulid::Ulid;

    fn scheduler(workers: usize, capacity: usize) -> Scheduler {
        Scheduler::new(SchedulerConfig {
            worker_count: workers,
            capacity,
            aging_threshold: Duration::from_secs(30),
            probe_backoff: RetryPolicy::new(
                Duration::from_millis(100),
                2.0,
                Duration::from_secs(1),
            ),
        })
    }

    fn new_id() -> TaskId {
        TaskId::from_ulid(Ulid::new())
    }

    fn submit(s: &Scheduler, priority: Priority) -> TaskId {
        let id = new_id();
        let admission = s.reserve(false).unwrap();
        s.enqueue(admission, id, priority).unwrap();
        id
    }

    #[test]
    fn capacity_counts_reservations() {
        let s = scheduler(1, 2);
        let _a = s.reserve(false).unwrap();
        let _b = s.reserve(false).unwrap();

        assert_eq!(
            s.reserve(false),
            Err(SchedulerError::CapacityExceeded { capacity: 2 })
        );
        // retries are not bounded
        assert!(s.reserve(true).is_ok());
    }

    #[test]
    fn release_frees_capacity() {
        let s = scheduler(1, 1);
        let a = s.reserve(false).unwrap();
        assert!(s.reserve(false).is_err());
        s.release(a);
        assert!(s.reserve(false).is_ok());
    }

    #[test]
    fn sequence_numbers_follow_reservation_order() {
        let s = scheduler(1, 10);
        let a = s.reserve(false).unwrap();
        let b = s.reserve(false).unwrap();
        assert!(a.seq() < b.seq());
        s.release(a);
        s.release(b);
    }

    #[tokio::test]
    async fn lease_picks_priority_then_fifo() {
        let s = scheduler(1, 10);
        let low = submit(&s, Priority::Low);
        let high1 = submit(&s, Priority::High);
        let normal = submit(&s, Priority::Normal);
        let high2 = submit(&s, Priority::High);

        let mut order = Vec::new();
        for _ in 0..4 {
            let Lease::Task(id) = s.lease(WorkerId(0)).await else {
                panic!("expected a task");
            };
            s.complete(WorkerId(0), id, WorkerReport::Healthy);
            order.push(id);
        }
        assert_eq!(order, vec![high1, high2, normal, low]);
    }

    #[tokio::test]
    async fn each_task_is_leased_once() {
        let s = Arc::new(scheduler(2, 10));
        let only = submit(&s, Priority::Normal);

        assert_eq!(s.lease(WorkerId(0)).await, Lease::Task(only));
        let second = tokio::time::timeout(Duration::from_millis(20), s.lease(WorkerId(1))).await;
        assert!(second.is_err());
        assert_eq!(s.in_flight(), vec![only]);
    }

    #[tokio::test]
    async fn waiting_worker_wakes_on_enqueue() {
        let s = Arc::new(scheduler(1, 10));
        let waiter = {
            let s = Arc::clone(&s);
            tokio::spawn(async move { s.lease(WorkerId(0)).await })
        };
        tokio::task::yield_now().await;

        let id = submit(&s, Priority::Normal);
        assert_eq!(waiter.await.unwrap(), Lease::Task(id));
    }

    #[tokio::test]
    async fn withdrawn_task_is_never_leased() {
        let s = scheduler(1, 10);
        let gone = submit(&s, Priority::Critical);
        let kept = submit(&s, Priority::Low);

        assert!(s.withdraw(gone));
        assert!(!s.withdraw(gone));
        assert_eq!(s.lease(WorkerId(0)).await, Lease::Task(kept));
    }

    #[tokio::test(start_paused = true)]
    async fn faulted_worker_probes_after_backoff() {
        let s = scheduler(1, 10);
        let first = submit(&s, Priority::Normal);
        assert_eq!(s.lease(WorkerId(0)).await, Lease::Task(first));
        s.complete(WorkerId(0), first, WorkerReport::Fault);

        let _queued = submit(&s, Priority::Normal);
        let start = Instant::now();
        assert_eq!(s.lease(WorkerId(0)).await, Lease::Probe);
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(s.stats().unhealthy_workers, 1);

        assert!(s.probe_result(WorkerId(0), true));
        assert!(matches!(s.lease(WorkerId(0)).await, Lease::Task(_)));
        assert_eq!(s.stats().unhealthy_workers, 0);
    }

    #[tokio::test]
    async fn close_rejects_new_work_and_returns_queue() {
        let s = scheduler(1, 10);
        let a = submit(&s, Priority::Low);
        let b = submit(&s, Priority::High);
        let pending = s.reserve(false).unwrap();

        assert_eq!(s.close(), vec![a, b]);
        assert_eq!(s.reserve(true), Err(SchedulerError::ShuttingDown));
        assert_eq!(
            s.enqueue(pending, new_id(), Priority::Normal),
            Err(SchedulerError::ShuttingDown)
        );
        let stats = s.stats();
        assert!(!stats.accepting);
        assert_eq!(stats.ready, 0);
        assert_eq!(stats.reserved, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_idle_reports_stragglers() {
        let s = Arc::new(scheduler(1, 10));
        let id = submit(&s, Priority::Normal);
        assert_eq!(s.lease(WorkerId(0)).await, Lease::Task(id));

        assert_eq!(s.wait_idle(Duration::from_millis(50)).await, Err(vec![id]));

        let finisher = {
            let s = Arc::clone(&s);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                s.complete(WorkerId(0), id, WorkerReport::Healthy);
            })
        };
        assert_eq!(s.wait_idle(Duration::from_secs(1)).await, Ok(()));
        finisher.await.unwrap();
    }
}
