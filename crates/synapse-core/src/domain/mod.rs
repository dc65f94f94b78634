//! Domain model (ids, task, state machine, metadata, errors, events).
//!
//! Nothing in here does I/O or knows about workers and queues.

pub mod errors;
pub mod events;
pub mod ids;
pub mod memory;
pub mod metadata;
pub mod outcome;
pub mod priority;
pub mod state;
pub mod status;
pub mod task;

pub use errors::{
    ConfigError, ExecutionError, FailureKind, OrchestratorError, RecallError, RecordError,
    SchedulerError, TransitionError, ValidationError,
};
pub use events::TaskEvent;
pub use ids::{ParseTaskIdError, TaskId, WorkerId};
pub use memory::{Memory, RecallQuery};
pub use metadata::Metadata;
pub use outcome::OutcomeRecord;
pub use priority::Priority;
pub use state::TaskState;
pub use status::{RecordStatus, StateCounts, TaskStatus};
pub use task::{Task, validate_payload};
