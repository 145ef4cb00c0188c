//! State - EntityStore のライフサイクル状態

use serde::{Deserialize, Serialize};

/// Lifecycle of an entity store.
///
/// # 状態遷移
/// - Uninitialized --initialize(成功)--> Initialized --close()--> Closed
/// - initialize 失敗時は Uninitialized のまま
///
/// 逆方向の遷移はない。データ操作は Initialized のときだけ受け付ける。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreState {
    Uninitialized,
    Initialized,
    Closed,
}

impl StoreState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, StoreState::Closed)
    }

    /// Are save/load accepted in this state?
    pub fn accepts_operations(self) -> bool {
        matches!(self, StoreState::Initialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_initialized_accepts_operations() {
        assert!(!StoreState::Uninitialized.accepts_operations());
        assert!(StoreState::Initialized.accepts_operations());
        assert!(!StoreState::Closed.accepts_operations());
    }

    #[test]
    fn closed_is_terminal() {
        assert!(StoreState::Closed.is_terminal());
        assert!(!StoreState::Initialized.is_terminal());
    }
}
