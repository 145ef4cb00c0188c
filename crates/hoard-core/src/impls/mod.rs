//! Impls - Backend port の具体実装
//!
//! - **SqliteBackend**: 組み込みファイル DB（`kind = "file"`）
//! - **MySqlBackend**: ネットワーク DB、接続プール付き（`kind = "network"`、`mysql` feature）
//! - **MemoryBackend**: テスト・デモ用（`kind = "memory"`）
//!
//! 設定ファイルから選ぶときは [`AnyBackend::from_config`] を使う。

pub mod memory;
#[cfg(feature = "mysql")]
pub mod mysql;
pub mod sqlite;

pub use self::memory::MemoryBackend;
#[cfg(feature = "mysql")]
pub use self::mysql::MySqlBackend;
pub use self::sqlite::SqliteBackend;

use crate::config::{BackendConfig, ConfigError};
use crate::ports::{Backend, BackendError, ConnectionParams, Session};

/// Backend chosen at runtime from [`BackendConfig`].
pub enum AnyBackend {
    File(SqliteBackend),
    #[cfg(feature = "mysql")]
    Network(MySqlBackend),
    Memory(MemoryBackend),
}

impl AnyBackend {
    pub fn from_config(config: &BackendConfig) -> Result<Self, ConfigError> {
        match config {
            BackendConfig::File(file) => Ok(AnyBackend::File(SqliteBackend::open_file(&file.path))),
            #[cfg(feature = "mysql")]
            BackendConfig::Network(network) => {
                Ok(AnyBackend::Network(MySqlBackend::new(network.clone())))
            }
            #[cfg(not(feature = "mysql"))]
            BackendConfig::Network(_) => Err(ConfigError::BackendUnavailable("network")),
            BackendConfig::Memory => Ok(AnyBackend::Memory(MemoryBackend::new())),
        }
    }

    fn inner(&self) -> &dyn Backend {
        match self {
            AnyBackend::File(b) => b,
            #[cfg(feature = "mysql")]
            AnyBackend::Network(b) => b,
            AnyBackend::Memory(b) => b,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Backend {
        match self {
            AnyBackend::File(b) => b,
            #[cfg(feature = "mysql")]
            AnyBackend::Network(b) => b,
            AnyBackend::Memory(b) => b,
        }
    }
}

impl Backend for AnyBackend {
    fn connect(&mut self, tables: &[String]) -> Result<(), BackendError> {
        self.inner_mut().connect(tables)
    }

    fn is_open(&self) -> bool {
        self.inner().is_open()
    }

    fn open_session(&mut self) -> Result<Box<dyn Session + '_>, BackendError> {
        self.inner_mut().open_session()
    }

    fn close(&mut self) {
        self.inner_mut().close()
    }

    fn connection_params(&self) -> ConnectionParams {
        self.inner().connection_params()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HoardConfig;

    #[test]
    fn memory_config_builds_memory_backend() {
        let config = HoardConfig::from_toml_str("[backend]\nkind = \"memory\"\n").unwrap();
        let mut backend = AnyBackend::from_config(&config.backend).unwrap();
        assert!(matches!(backend, AnyBackend::Memory(_)));

        backend.connect(&["t".to_string()]).unwrap();
        assert!(backend.is_open());
        assert_eq!(backend.connection_params(), ConnectionParams::Memory);
        backend.close();
        assert!(!backend.is_open());
    }

    #[test]
    fn default_config_is_a_sqlite_file() {
        let backend = AnyBackend::from_config(&BackendConfig::default()).unwrap();
        assert_eq!(backend.connection_params().to_string(), "sqlite://hoard.sqlite");
    }

    #[cfg(not(feature = "mysql"))]
    #[test]
    fn network_backend_requires_feature() {
        let config = HoardConfig::from_toml_str(
            "[backend]\nkind = \"network\"\nhost = \"h\"\ndatabase = \"d\"\nuser = \"u\"\n",
        )
        .unwrap();
        let err = AnyBackend::from_config(&config.backend).err().unwrap();
        assert!(matches!(err, ConfigError::BackendUnavailable("network")));
    }
}
