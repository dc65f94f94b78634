//! Scheduling data structures: the aging ready queue, worker slots and the
//! backoff policy shared by retries, recording and recovery probes.

pub mod ready;
pub mod retry;
pub mod slots;

pub use ready::{ReadyEntry, ReadyQueue};
pub use retry::RetryPolicy;
pub use slots::{WorkerHealth, WorkerSlot};
