//! Entity trait - ストアに保存できる型の定義
//!
//! `Entity` は論理名（テーブル名の元になる）と文字列 ID を持つ。
//! 永続化は serde で JSON document にして行うので、ORM のマッピング定義は要らない。

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// A domain object persisted by an [`EntityStore`](crate::app::EntityStore).
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct PlayerData {
///     uuid: String,
///     coins: i64,
/// }
///
/// impl Entity for PlayerData {
///     const NAME: &'static str = "player_data";
///
///     fn id(&self) -> &str {
///         &self.uuid
///     }
/// }
/// ```
///
/// # Trait Bounds
/// - `Serialize + DeserializeOwned`: document との相互変換
/// - `Send + 'static`: ワーカースレッドへ move するため
pub trait Entity: Serialize + DeserializeOwned + Send + 'static {
    /// Logical name; the physical table is `TableFormat::resolve(NAME)`.
    const NAME: &'static str;

    /// The key this entity is stored under (conventionally a UUID).
    fn id(&self) -> &str;
}

/// Builds the default entity for an id that has no row yet.
pub type EntityFactory<E> = Arc<dyn Fn(&str) -> E + Send + Sync>;
