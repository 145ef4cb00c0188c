//! StoreBuilder - EntityStore の構築
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）: 設定ミスは `initialize()` まで持ち越さず `build()` で弾く
//!
//! # 検証内容
//! - デフォルトエンティティのファクトリが登録されているか
//! - テーブル名フォーマットが `{name}` を 1 つだけ含み、`Entity::NAME` を埋めた結果が識別子として妥当か

use std::marker::PhantomData;
use std::sync::Arc;

use thiserror::Error;

use super::store::EntityStore;
use crate::config::StoreSettings;
use crate::domain::{Entity, EntityFactory, NamingError, TableFormat};
use crate::ports::Backend;
use crate::queue::QueueSettings;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no default entity factory registered for '{0}'")]
    MissingDefaultFactory(&'static str),

    #[error(transparent)]
    InvalidTableFormat(#[from] NamingError),
}

/// # 使用例
/// ```ignore
/// let store = EntityStore::<PlayerData, _>::builder(SqliteBackend::open_file("hoard.sqlite"))
///     .table_format("lobby_{name}")
///     .default_entity(PlayerData::new)
///     .build()?;
/// assert!(store.initialize());
/// ```
pub struct StoreBuilder<E: Entity, B: Backend> {
    backend: B,
    factory: Option<EntityFactory<E>>,
    table_format: Option<String>,
    queue_settings: QueueSettings,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity, B: Backend> StoreBuilder<E, B> {
    pub(crate) fn new(backend: B) -> Self {
        Self {
            backend,
            factory: None,
            table_format: None,
            queue_settings: QueueSettings::default(),
            _entity: PhantomData,
        }
    }

    /// Physical table name pattern; defaults to `{name}`.
    pub fn table_format(mut self, format: impl Into<String>) -> Self {
        self.table_format = Some(format.into());
        self
    }

    /// Factory used by create-if-missing loads. Receives the requested id.
    pub fn default_entity(mut self, factory: impl Fn(&str) -> E + Send + Sync + 'static) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    pub fn queue_settings(mut self, settings: QueueSettings) -> Self {
        self.queue_settings = settings;
        self
    }

    /// Applies the `[store]` section of a config file.
    pub fn settings(self, settings: &StoreSettings) -> Self {
        self.table_format(settings.table_format.as_str())
            .queue_settings(settings.queue_settings())
    }

    pub fn build(self) -> Result<EntityStore<E, B>, BuildError> {
        let factory = self
            .factory
            .ok_or(BuildError::MissingDefaultFactory(E::NAME))?;
        let table_format = match self.table_format {
            Some(raw) => TableFormat::new(raw)?,
            None => TableFormat::default(),
        };
        table_format.resolve(E::NAME)?;

        Ok(EntityStore::from_parts(
            self.backend,
            factory,
            table_format,
            self.queue_settings,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StoreState;
    use crate::domain::entity::fixtures::Profile;
    use crate::impls::MemoryBackend;

    fn builder() -> StoreBuilder<Profile, MemoryBackend> {
        EntityStore::builder(MemoryBackend::new())
    }

    #[test]
    fn test_build_success() {
        let store = builder()
            .table_format("lobby_{name}")
            .default_entity(Profile::new)
            .build()
            .unwrap();
        assert_eq!(store.state(), StoreState::Uninitialized);
        assert_eq!(store.table_format().as_str(), "lobby_{name}");
    }

    #[test]
    fn test_build_missing_factory() {
        let store = builder().build();
        assert!(matches!(store, Err(BuildError::MissingDefaultFactory("profile"))));
    }

    #[test]
    fn test_build_bad_placeholder() {
        let store = builder()
            .table_format("{name}_{name}")
            .default_entity(Profile::new)
            .build();
        assert!(matches!(
            store,
            Err(BuildError::InvalidTableFormat(NamingError::Placeholder(_)))
        ));
    }

    #[test]
    fn test_build_bad_identifier() {
        let store = builder()
            .table_format("drop table;{name}")
            .default_entity(Profile::new)
            .build();
        assert!(matches!(
            store,
            Err(BuildError::InvalidTableFormat(NamingError::InvalidIdentifier(_)))
        ));
    }

    #[test]
    fn test_build_with_settings() {
        let settings = StoreSettings {
            join_timeout_ms: 250,
            ..StoreSettings::default()
        };
        let store = builder()
            .settings(&settings)
            .default_entity(Profile::new)
            .build()
            .unwrap();
        assert_eq!(
            store.queue_settings().join_timeout,
            std::time::Duration::from_millis(250)
        );
    }
}
