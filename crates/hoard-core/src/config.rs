//! Configuration file (`hoard.toml`).
//!
//! ```toml
//! [store]
//! table_format = "lobby_{name}"
//! join_timeout_ms = 10000
//!
//! [backend]
//! kind = "network"
//! host = "db.internal"
//! database = "minecraft"
//! user = "mc"
//! password = "secret"
//!
//! [backend.pool]
//! max_pool_size = 4
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::TableFormat;
use crate::queue::QueueSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("backend '{0}' is not available in this build")]
    BackendUnavailable(&'static str),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HoardConfig {
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub backend: BackendConfig,
}

impl HoardConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.join_timeout_ms == 0 {
            return Err(ConfigError::Invalid("store.join_timeout_ms must be > 0".into()));
        }
        if self.store.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("store.poll_interval_ms must be > 0".into()));
        }
        if let BackendConfig::Network(network) = &self.backend {
            network.validate()?;
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// StoreSettings
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub table_format: TableFormat,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            table_format: TableFormat::default(),
            poll_interval_ms: default_poll_interval_ms(),
            join_timeout_ms: default_join_timeout_ms(),
        }
    }
}

impl StoreSettings {
    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            join_timeout: Duration::from_millis(self.join_timeout_ms),
            ..QueueSettings::default()
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_join_timeout_ms() -> u64 {
    10_000
}

// -----------------------------------------------------------------------------
// BackendConfig
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Embedded SQLite file.
    File(FileConfig),
    /// MySQL/MariaDB server.
    Network(NetworkConfig),
    /// Process memory only.
    Memory,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::File(FileConfig {
            path: PathBuf::from("hoard.sqlite"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileConfig {
    pub path: PathBuf,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub pool: PoolConfig,
}

impl NetworkConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() || self.database.is_empty() {
            return Err(ConfigError::Invalid(
                "backend.host and backend.database are required".into(),
            ));
        }
        self.pool.validate()
    }
}

impl fmt::Debug for NetworkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("pool", &self.pool)
            .finish()
    }
}

fn default_port() -> u16 {
    3306
}

/// Connection-pool knobs handed to the networked backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub min_idle: usize,
    pub max_pool_size: usize,
    pub idle_timeout_ms: u64,
    pub connection_timeout_ms: u64,
    pub max_lifetime_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        // ワーカーは 1 本なので同時に使う接続も 1 本
        Self {
            min_idle: 1,
            max_pool_size: 1,
            idle_timeout_ms: 600_000,
            connection_timeout_ms: 30_000,
            max_lifetime_ms: 1_800_000,
        }
    }
}

impl PoolConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_millis(self.max_lifetime_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pool_size == 0 {
            return Err(ConfigError::Invalid("pool.max_pool_size must be > 0".into()));
        }
        if self.min_idle > self.max_pool_size {
            return Err(ConfigError::Invalid(format!(
                "pool.min_idle ({}) exceeds pool.max_pool_size ({})",
                self.min_idle, self.max_pool_size
            )));
        }
        Ok(())
    }
}
