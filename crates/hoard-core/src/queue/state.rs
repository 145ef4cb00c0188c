//! Lifecycle of a task queue.

use serde::{Deserialize, Serialize};

/// Queue state.
///
/// State transitions:
/// - Idle -> Running (`start`)
/// - Running -> ShutDown (`shutdown`, or drop)
///
/// A queue is started at most once; there is no way back from `ShutDown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueState {
    /// Constructed, no worker yet.
    Idle,

    /// Worker is draining the queue.
    Running,

    /// Drained and stopped (terminal).
    ShutDown,
}

impl QueueState {
    pub fn is_terminal(self) -> bool {
        matches!(self, QueueState::ShutDown)
    }

    /// Is this queue accepting new tasks?
    pub fn accepts_tasks(self) -> bool {
        matches!(self, QueueState::Running)
    }
}
