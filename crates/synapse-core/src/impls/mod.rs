//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **MemoryBank**: RecallStore + ResultRecorder を兼ねる in-process の記憶
//!
//! `NoRecall` / `DiscardRecorder` は ports 側にあります。

pub mod memory_bank;

// 主要な型を再エクスポート
pub use self::memory_bank::MemoryBank;
