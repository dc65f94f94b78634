//! Ports - 抽象化レイヤー
//!
//! Traits for everything the orchestrator talks to but does not own: the
//! recall store, the result recorder, the execution strategy, time and ids.

pub mod clock;
pub mod executor;
pub mod id_generator;
pub mod recall_store;
pub mod result_recorder;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::executor::{ExecutionRequest, ExecutionStrategy};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::recall_store::{NoRecall, RecallStore};
pub use self::result_recorder::{DiscardRecorder, RecordAck, ResultRecorder};
