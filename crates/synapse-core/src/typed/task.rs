//! TaskKind trait - 型付き Task の定義
//!
//! # 学習ポイント
//! - Associated Constants (`const TYPE`)
//! - Associated Types (`type Output`)

use serde::Serialize;
use serde::de::DeserializeOwned;

/// TaskKind は task_type と payload の型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Summarize {
///     text: String,
/// }
///
/// impl TaskKind for Summarize {
///     const TYPE: &'static str = "agent.text.summarize.v1";
///     type Output = String;
/// }
/// ```
///
/// # Trait Bounds
/// - `DeserializeOwned`: payload (JSON) からの復元のため
/// - `Serialize`: ログや再投入のため
/// - `Send + Sync + 'static`: worker task 間で move するため
pub trait TaskKind: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Routing key matched against `metadata.task_type`.
    ///
    /// # 命名規約
    /// - `{namespace}.{domain}.{action}.v{major}`
    /// - 例: `agent.text.summarize.v1`
    const TYPE: &'static str;

    /// Handler の戻り値。task の result として JSON にエンコードされる
    type Output: Serialize + Send + 'static;
}
