//! Observability - キューの状態を外から覗くためのビュー

use serde::{Deserialize, Serialize};

/// Snapshot of a task queue's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Tasks waiting for the worker.
    pub pending: usize,
    /// Tasks run to completion (including drained ones).
    pub executed: u64,
    /// Tasks that panicked; the worker kept going.
    pub panicked: u64,
    /// Tasks run by `shutdown()` on the calling thread.
    pub drained: u64,
    /// Tasks dropped unrun because shutdown timed out on a hung task.
    pub abandoned: u64,
}
