//! Typed - 型付き Task API
//!
//! このモジュールは task_type の typo を型で排除し、
//! Handler との対応付けを静的に保証します。
//!
//! # 二層構造
//! - **表層（Typed）**: `TaskKind` trait, `Handler<T>` trait - 型安全
//! - **内部（Dyn）**: `DynHandler` trait - object-safe, type erasure
//!
//! `HandlerRegistry` は `ExecutionStrategy` を実装しているので、
//! そのまま Orchestrator に渡せます。

pub mod codec;
pub mod handler;
pub mod registry;
pub mod task;

// 主要な trait/型 を再エクスポート
pub use self::codec::CodecError;
pub use self::handler::{DynHandler, Handler, HandlerContext, TypedHandler};
pub use self::registry::{HandlerRegistry, RegistryError};
pub use self::task::TaskKind;
