//! Ports - ストレージエンジンへの抽象化レイヤー
//!
//! EntityStore はこの trait だけを見て動く。具体的なエンジン（SQLite ファイル、
//! ネットワーク越しの MySQL/MariaDB、テスト用のメモリ）は `impls` にある。

pub mod backend;

pub use self::backend::{Backend, BackendError, ConnectionParams, Session};
