//! Errors surfaced by the entity store and its promises.

use std::time::Duration;

use thiserror::Error;

use crate::domain::TaskId;
use crate::ports::BackendError;
use crate::queue::QueueError;

#[derive(Debug, Error)]
pub enum StoreError {
    /// save/load before a successful `initialize()`.
    #[error("entity store is not initialized")]
    NotInitialized,

    /// save/load/close after `close()`.
    #[error("entity store is closed")]
    Closed,

    #[error("task queue: {0}")]
    Queue(#[from] QueueError),

    #[error("backend: {0}")]
    Backend(#[from] BackendError),

    #[error("failed to encode/decode entity '{entity}': {source}")]
    Codec {
        entity: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The default-entity factory built an entity with a different id.
    #[error("default '{entity}' for id '{requested}' came back with id '{produced}'")]
    IdMismatch {
        entity: &'static str,
        requested: String,
        produced: String,
    },

    /// The task was dropped before it completed its promise (it panicked).
    #[error("{0} ended without producing a result")]
    Abandoned(TaskId),

    #[error("{task_id} did not complete within {timeout:?}")]
    Timeout { task_id: TaskId, timeout: Duration },
}

impl StoreError {
    /// Usage errors are raised synchronously on the calling thread, before
    /// anything is enqueued.
    pub fn is_usage_error(&self) -> bool {
        matches!(self, StoreError::NotInitialized | StoreError::Closed)
    }
}
