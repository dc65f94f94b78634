//! Handler trait - TaskKind を実行する Handler の定義
//!
//! # 学習ポイント
//! - ジェネリック trait (Handler<T>)
//! - Object-safe trait (DynHandler)
//! - Type erasure パターン (TypedHandler<T, H> → DynHandler)

use std::marker::PhantomData;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::codec;
use super::task::TaskKind;
use crate::domain::{ExecutionError, Memory, Metadata, Priority, TaskId};
use crate::ports::ExecutionRequest;

/// Everything about the running task except its decoded payload.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub task_id: TaskId,
    pub priority: Priority,
    pub metadata: Metadata,
    pub cancel: CancellationToken,
}

impl HandlerContext {
    pub fn attempt(&self) -> u32 {
        self.metadata.attempt
    }

    /// Memories merged in by enrichment. Empty after a recall outage.
    pub fn recalled(&self) -> &[Memory] {
        self.metadata.recalled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Handler は TaskKind を実行して Output を返す
///
/// # 使用例
/// ```ignore
/// struct SummarizeHandler;
///
/// #[async_trait]
/// impl Handler<Summarize> for SummarizeHandler {
///     async fn handle(&self, task: Summarize, ctx: HandlerContext) -> Result<String, ExecutionError> {
///         tokio::select! {
///             _ = ctx.cancel.cancelled() => Err(ExecutionError::cancelled()),
///             summary = summarize(&task.text, ctx.recalled()) => Ok(summary),
///         }
///     }
/// }
/// ```
///
/// # ジェネリクスによる型安全性
/// - `Handler<Summarize>` は `Summarize` しか受け取れない
/// - コンパイル時に TaskKind と Handler の対応が保証される
#[async_trait]
pub trait Handler<T: TaskKind>: Send + Sync {
    async fn handle(&self, task: T, ctx: HandlerContext) -> Result<T::Output, ExecutionError>;
}

/// DynHandler は object-safe な Handler の抽象化
///
/// TypedHandler<T, H> を DynHandler に変換することで、
/// HashMap<String, Arc<dyn DynHandler>> に格納可能にします。
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> Result<Value, ExecutionError>;

    fn task_type(&self) -> &'static str;
}

pub struct TypedHandler<T: TaskKind, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: TaskKind, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: TaskKind, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle_dyn(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> Result<Value, ExecutionError> {
        let task = codec::decode::<T>(request.payload)?;
        let ctx = HandlerContext {
            task_id: request.task_id,
            priority: request.priority,
            metadata: request.metadata,
            cancel,
        };
        let output = self.handler.handle(task, ctx).await?;
        Ok(codec::encode::<T>(&output)?)
    }

    fn task_type(&self) -> &'static str {
        T::TYPE
    }
}
