//! Worker slots: per-worker occupancy and health.

use tokio::time::Instant;

use super::retry::RetryPolicy;
use crate::domain::{TaskId, WorkerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerHealth {
    Healthy,
    /// Excluded from dispatch until a probe at or after `next_probe_at`
    /// succeeds.
    Unhealthy {
        consecutive_faults: u32,
        next_probe_at: Instant,
    },
}

#[derive(Debug, Clone)]
pub struct WorkerSlot {
    pub worker_id: WorkerId,
    pub current_task: Option<TaskId>,
    pub probing: bool,
    pub health: WorkerHealth,
}

impl WorkerSlot {
    pub fn new(worker_id: WorkerId) -> Self {
        Self {
            worker_id,
            current_task: None,
            probing: false,
            health: WorkerHealth::Healthy,
        }
    }

    pub fn busy(&self) -> bool {
        self.current_task.is_some() || self.probing
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.health, WorkerHealth::Healthy)
    }

    /// `Some(at)` while unhealthy.
    pub fn next_probe_at(&self) -> Option<Instant> {
        match self.health {
            WorkerHealth::Healthy => None,
            WorkerHealth::Unhealthy { next_probe_at, .. } => Some(next_probe_at),
        }
    }

    pub fn assign(&mut self, task_id: TaskId) {
        self.current_task = Some(task_id);
    }

    pub fn release(&mut self) -> Option<TaskId> {
        self.current_task.take()
    }

    pub fn start_probe(&mut self) {
        self.probing = true;
    }

    /// Record an infrastructure fault and schedule the next probe.
    pub fn mark_fault(&mut self, now: Instant, backoff: &RetryPolicy) {
        let consecutive_faults = match self.health {
            WorkerHealth::Healthy => 1,
            WorkerHealth::Unhealthy {
                consecutive_faults, ..
            } => consecutive_faults.saturating_add(1),
        };
        self.health = WorkerHealth::Unhealthy {
            consecutive_faults,
            next_probe_at: now + backoff.next_delay(consecutive_faults),
        };
    }

    /// Returns true when the worker went back to healthy.
    pub fn finish_probe(&mut self, ok: bool, now: Instant, backoff: &RetryPolicy) -> bool {
        self.probing = false;
        if ok {
            self.health = WorkerHealth::Healthy;
        } else {
            self.mark_fault(now, backoff);
        }
        ok
    }
}
