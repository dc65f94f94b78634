//! Payload codec - JSON payload と TaskKind の相互変換

use serde_json::Value;

use super::task::TaskKind;
use crate::domain::ExecutionError;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("cannot decode payload as {task_type}: {source}")]
    Decode {
        task_type: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot encode output of {task_type}: {source}")]
    Encode {
        task_type: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// A payload that does not fit the declared type never will.
impl From<CodecError> for ExecutionError {
    fn from(err: CodecError) -> Self {
        ExecutionError::permanent(err.to_string())
    }
}

pub fn decode<T: TaskKind>(payload: Value) -> Result<T, CodecError> {
    serde_json::from_value(payload).map_err(|source| CodecError::Decode {
        task_type: T::TYPE,
        source,
    })
}

pub fn encode<T: TaskKind>(output: &T::Output) -> Result<Value, CodecError> {
    serde_json::to_value(output).map_err(|source| CodecError::Encode {
        task_type: T::TYPE,
        source,
    })
}
