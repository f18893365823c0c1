//! JobPayload trait - 型付き payload の定義
//!
//! # 学習ポイント
//! - Associated Constants (`const TYPE`)
//! - Trait bounds の組み合わせ (Serialize + DeserializeOwned + Send + Sync + 'static)

use serde::Serialize;
use serde::de::DeserializeOwned;

/// JobPayload は job type と payload の型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SendMail {
///     to: String,
///     subject: String,
/// }
///
/// impl JobPayload for SendMail {
///     const TYPE: &'static str = "school.mail.send.v1";
/// }
/// ```
///
/// # 命名規約
/// - `{namespace}.{domain}.{action}.v{major}`
pub trait JobPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: &'static str;
}
