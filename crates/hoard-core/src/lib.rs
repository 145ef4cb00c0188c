//! hoard-core
//!
//! Asynchronous entity persistence: one worker thread per store, FIFO task
//! queue, promises for results, pluggable relational backends.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（Entity, TaskId, TableFormat, StoreState, codec）
//! - **queue**: 単一ワーカーの TaskQueue と Promise
//! - **ports**: 抽象化レイヤー（Backend, Session）
//! - **impls**: 実装（SqliteBackend, MySqlBackend, MemoryBackend, AnyBackend）
//! - **app**: EntityStore とその Builder
//! - **config**: `hoard.toml` の読み込み
//! - **observability**: キューの統計ビュー
//! - **error**: StoreError

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;

pub use crate::app::{BuildError, EntityStore, StoreBuilder};
pub use crate::config::{BackendConfig, ConfigError, HoardConfig, StoreSettings};
pub use crate::domain::{Entity, EntityFactory, StoreState, TableFormat, TaskId};
pub use crate::error::StoreError;
pub use crate::impls::{AnyBackend, MemoryBackend, SqliteBackend};
pub use crate::observability::QueueStats;
pub use crate::ports::{Backend, BackendError, ConnectionParams, Session};
pub use crate::queue::{Promise, QueueError, QueueSettings, ShutdownReport, TaskQueue};
