//! Promise - 1 回だけ完了する結果ハンドル
//!
//! # 学習ポイント
//! - `tokio::sync::oneshot` で「書き込みは 1 回だけ」を型で保証する
//! - `Completer::complete(self)` は self を消費するので二重完了はコンパイルエラー
//! - Completer が完了せずに drop された（タスクが panic した）場合も、
//!   受け取り側は `StoreError::Abandoned` で必ず起きる

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::domain::TaskId;
use crate::error::StoreError;

/// Result handle for one queued task.
///
/// `.await` it from async code, or call [`Promise::wait`] from a plain thread.
#[derive(Debug)]
#[must_use = "a promise does nothing unless awaited or waited on"]
pub struct Promise<T> {
    task_id: TaskId,
    rx: oneshot::Receiver<Result<T, StoreError>>,
}

/// Write side of a [`Promise`], owned by the queued task.
#[derive(Debug)]
pub(crate) struct Completer<T> {
    tx: oneshot::Sender<Result<T, StoreError>>,
}

impl<T> Completer<T> {
    pub(crate) fn complete(self, result: Result<T, StoreError>) {
        // ignore send error: the caller dropped the promise
        let _ = self.tx.send(result);
    }
}

impl<T> Promise<T> {
    pub(crate) fn pair(task_id: TaskId) -> (Completer<T>, Promise<T>) {
        let (tx, rx) = oneshot::channel();
        (Completer { tx }, Promise { task_id, rx })
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Blocks the current thread until the task completes.
    ///
    /// Must not be called from inside an async runtime; `.await` the promise there.
    pub fn wait(self) -> Result<T, StoreError> {
        let task_id = self.task_id;
        self.rx
            .blocking_recv()
            .unwrap_or(Err(StoreError::Abandoned(task_id)))
    }

    /// Awaits the result for at most `timeout`.
    pub async fn wait_timeout(self, timeout: Duration) -> Result<T, StoreError> {
        let task_id = self.task_id;
        match tokio::time::timeout(timeout, self).await {
            Ok(result) => result,
            Err(_elapsed) => Err(StoreError::Timeout { task_id, timeout }),
        }
    }
}

impl<T> Future for Promise<T> {
    type Output = Result<T, StoreError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let task_id = this.task_id;
        Pin::new(&mut this.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(StoreError::Abandoned(task_id))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn await_yields_completed_value() {
        let (completer, promise) = Promise::pair(TaskId::generate());
        completer.complete(Ok(42));
        assert_eq!(promise.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn dropped_completer_abandons_promise() {
        let task_id = TaskId::generate();
        let (completer, promise) = Promise::<()>::pair(task_id);
        drop(completer);
        let err = promise.await.unwrap_err();
        assert!(matches!(err, StoreError::Abandoned(id) if id == task_id));
    }

    #[tokio::test]
    async fn wait_timeout_reports_hung_task() {
        let (_completer, promise) = Promise::<()>::pair(TaskId::generate());
        let err = promise
            .wait_timeout(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Timeout { .. }));
    }

    #[test]
    fn wait_blocks_until_completed_from_another_thread() {
        let (completer, promise) = Promise::pair(TaskId::generate());
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            completer.complete(Ok("done"));
        });
        assert_eq!(promise.wait().unwrap(), "done");
        handle.join().unwrap();
    }
}
