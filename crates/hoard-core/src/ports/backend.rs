//! Backend port - セッションを開けるストレージエンジン
//!
//! # 設計原則
//! - Backend はワーカースレッドからしか触られない（`&mut self` で十分、内部ロック不要）
//! - タスク 1 件につきセッション 1 つ。セッション = 1 トランザクション
//! - `commit` せずに drop されたセッションはロールバック
//! - テーブル作成は `connect` 時にまとめて行う（存在しなければ作る）

use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend is not connected")]
    NotConnected,

    #[error("no such table: {0}")]
    UnknownTable(String),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[cfg(feature = "mysql")]
    #[error("mysql: {0}")]
    MySql(#[from] mysql::Error),

    #[error("invalid backend configuration: {0}")]
    Config(String),

    #[error("id is {len} characters long; this backend stores at most {max}")]
    IdTooLong { len: usize, max: usize },
}

/// Printable description of where a backend connects. Never contains secrets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionParams {
    File { path: String },
    Network {
        host: String,
        port: u16,
        database: String,
        user: String,
    },
    Memory,
}

impl fmt::Display for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionParams::File { path } => write!(f, "sqlite://{path}"),
            ConnectionParams::Network {
                host,
                port,
                database,
                user,
            } => write!(f, "mysql://{user}@{host}:{port}/{database}"),
            ConnectionParams::Memory => f.write_str("memory://"),
        }
    }
}

/// A storage engine an entity store can be bound to.
pub trait Backend: Send + 'static {
    /// Opens the connection (or pool) and creates any missing `tables`.
    fn connect(&mut self, tables: &[String]) -> Result<(), BackendError>;

    fn is_open(&self) -> bool;

    /// Begins a transaction. Only valid after a successful `connect`.
    fn open_session(&mut self) -> Result<Box<dyn Session + '_>, BackendError>;

    /// Releases the connection. Calling it on a closed backend is a no-op.
    fn close(&mut self);

    fn connection_params(&self) -> ConnectionParams;
}

/// One transaction against a backend. Rows are JSON documents keyed by id.
pub trait Session {
    fn get(&mut self, table: &str, id: &str) -> Result<Option<String>, BackendError>;

    /// Insert, or replace the whole document if `id` exists.
    fn put(&mut self, table: &str, id: &str, document: &str) -> Result<(), BackendError>;

    /// Every document in `table`, ordered by id.
    fn list(&mut self, table: &str) -> Result<Vec<String>, BackendError>;

    fn commit(self: Box<Self>) -> Result<(), BackendError>;
}
