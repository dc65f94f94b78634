//! HandlerRegistry - Handler の登録と task_type によるルーティング
//!
//! # 学習ポイント
//! - HashMap での型消去された trait object の管理
//! - Generic methods での登録と型安全性
//! - Arc による共有所有権

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::handler::{DynHandler, Handler, TypedHandler};
use super::task::TaskKind;
use crate::domain::ExecutionError;
use crate::ports::{ExecutionRequest, ExecutionStrategy};

/// HandlerRegistry は型付き Handler を登録し、ExecutionStrategy として振る舞う
///
/// # 使用例
/// ```ignore
/// let mut registry = HandlerRegistry::new();
/// registry.register::<Summarize, _>(SummarizeHandler)?;
///
/// // metadata.task_type == "agent.text.summarize.v1" の task が SummarizeHandler に届く
/// let strategy: Arc<dyn ExecutionStrategy> = Arc::new(registry);
/// ```
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn DynHandler>>,
}

/// RegistryError は HandlerRegistry の操作エラー
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Handler for task type '{0}' is already registered")]
    AlreadyRegistered(String),
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register<T: TaskKind, H: Handler<T> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        let task_type = T::TYPE.to_string();
        if self.handlers.contains_key(&task_type) {
            return Err(RegistryError::AlreadyRegistered(task_type));
        }
        let typed_handler = TypedHandler::<T, H>::new(handler);
        self.handlers.insert(task_type, Arc::new(typed_handler));
        Ok(())
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn DynHandler>> {
        self.handlers.get(task_type).cloned()
    }

    /// Sorted, so build errors and logs are stable.
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[async_trait]
impl ExecutionStrategy for HandlerRegistry {
    async fn execute(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> Result<Value, ExecutionError> {
        let Some(task_type) = request.task_type() else {
            return Err(ExecutionError::permanent("task has no task_type"));
        };
        let Some(handler) = self.get(task_type) else {
            tracing::warn!(task_id = %request.task_id, task_type, "no handler registered");
            return Err(ExecutionError::permanent(format!(
                "no handler registered for task type '{task_type}'"
            )));
        };
        handler.handle_dyn(request, cancel).await
    }
}
