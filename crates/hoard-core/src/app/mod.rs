//! App - アプリケーション層
//!
//! ports（Backend）と queue を組み合わせて EntityStore を組み立てる。
//!
//! # 主要コンポーネント
//! - **StoreBuilder**: EntityStore の構築と起動時検証
//! - **EntityStore**: save / load / initialize / close の非同期ファサード

pub mod builder;
pub mod store;

pub use self::builder::{BuildError, StoreBuilder};
pub use self::store::EntityStore;
