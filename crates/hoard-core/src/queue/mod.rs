//! Queue module: single-worker task queue, its promises, and lifecycle state.
//!
//! すべてのバックエンド操作を 1 本のワーカースレッドに直列化する。
//!
//! # 設計
//! - producer はいくつでも（`enqueue` / `submit` はブロックしない）
//! - consumer はワーカー 1 本だけ。実行順 = 投入順（FIFO）
//! - context（EntityStore ではバックエンド）は実行中のタスクしか触らない
//! - `shutdown` は残タスクを呼び出し元スレッドで全部実行してから、
//!   ワーカーの終了を `join_timeout` だけ待つ
//! - 実行中のタスクが `join_timeout` を過ぎても終わらなければ drain は諦め、
//!   残タスクの promise は `Abandoned` で完了させる（shutdown 自体は返る）

mod promise;
mod state;
mod worker;

pub use promise::Promise;
pub use state::QueueState;

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, trace, warn};

use self::worker::{Counters, Queued, Shared, lock};
use crate::domain::TaskId;
use crate::error::StoreError;
use crate::observability::QueueStats;

/// One deferred unit of work, run with exclusive access to the queue's context.
pub type Job<C> = Box<dyn FnOnce(&mut C) + Send + 'static>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("task queue already started")]
    AlreadyStarted,

    #[error("task queue not started")]
    NotStarted,

    #[error("task queue is shut down")]
    ShutDown,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// `start` failed. The context is handed back whenever it could be recovered.
pub struct StartError<C> {
    pub error: QueueError,
    pub context: Option<C>,
}

impl<C> fmt::Debug for StartError<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartError")
            .field("error", &self.error)
            .field("context_recovered", &self.context.is_some())
            .finish()
    }
}

impl<C> fmt::Display for StartError<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl<C> std::error::Error for StartError<C> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// How long the idle worker sleeps between checks for shutdown.
    pub poll_interval: Duration,

    /// Bounded wait for the worker thread to exit after the drain.
    pub join_timeout: Duration,

    pub thread_name: String,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            join_timeout: Duration::from_secs(10),
            thread_name: "hoard-data".to_string(),
        }
    }
}

/// What `shutdown` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    /// Tasks still queued at shutdown, run on the calling thread.
    pub drained: usize,

    /// `false` when the worker did not exit within `join_timeout` and was abandoned.
    pub joined: bool,

    /// Queued tasks dropped unrun because the in-flight task outlived
    /// `join_timeout`. Their promises resolve with `StoreError::Abandoned`.
    pub abandoned: usize,
}

enum Lifecycle<C> {
    Idle,
    Running(WorkerHandle<C>),
    ShutDown,
}

struct WorkerHandle<C> {
    shared: Arc<Shared<C>>,
    thread: JoinHandle<()>,
    /// Disconnects when the worker thread returns.
    exited: mpsc::Receiver<()>,
}

/// Ordered, thread-safe task queue drained by exactly one worker thread.
///
/// # 使用例
/// ```ignore
/// let queue = TaskQueue::new(QueueSettings::default());
/// queue.start(Vec::new())?;
/// let promise = queue.submit(|log: &mut Vec<u32>| {
///     log.push(1);
///     Ok(log.len())
/// })?;
/// assert_eq!(promise.wait()?, 1);
/// queue.shutdown()?;
/// ```
pub struct TaskQueue<C: Send + 'static> {
    settings: QueueSettings,
    lifecycle: Mutex<Lifecycle<C>>,
    counters: Arc<Counters>,
}

impl<C: Send + 'static> TaskQueue<C> {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            settings,
            lifecycle: Mutex::new(Lifecycle::Idle),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    pub fn state(&self) -> QueueState {
        match &*lock(&self.lifecycle) {
            Lifecycle::Idle => QueueState::Idle,
            Lifecycle::Running(_) => QueueState::Running,
            Lifecycle::ShutDown => QueueState::ShutDown,
        }
    }

    /// Takes ownership of `context` and launches the worker thread.
    ///
    /// A queue starts at most once; a second call fails with `AlreadyStarted`.
    pub fn start(&self, context: C) -> Result<(), StartError<C>> {
        let mut lifecycle = lock(&self.lifecycle);
        if !matches!(*lifecycle, Lifecycle::Idle) {
            return Err(StartError {
                error: QueueError::AlreadyStarted,
                context: Some(context),
            });
        }

        let shared = Arc::new(Shared::new(context, Arc::clone(&self.counters)));
        let worker_shared = Arc::clone(&shared);
        let poll_interval = self.settings.poll_interval;
        let (exit_tx, exited) = mpsc::channel::<()>();

        let spawned = thread::Builder::new()
            .name(self.settings.thread_name.clone())
            .spawn(move || {
                let _exit = exit_tx;
                worker::run(worker_shared, poll_interval);
            });

        match spawned {
            Ok(thread) => {
                *lifecycle = Lifecycle::Running(WorkerHandle {
                    shared,
                    thread,
                    exited,
                });
                info!(thread = %self.settings.thread_name, "task queue started");
                Ok(())
            }
            Err(e) => {
                // spawn に失敗したらクロージャは drop 済みなので Arc は 1 本に戻っている
                let context = Arc::try_unwrap(shared).ok().map(Shared::into_context);
                Err(StartError {
                    error: QueueError::Spawn(e),
                    context,
                })
            }
        }
    }

    /// Appends `job` to the tail of the queue. Never blocks on the worker.
    pub fn enqueue(
        &self,
        job: impl FnOnce(&mut C) + Send + 'static,
    ) -> Result<TaskId, QueueError> {
        let id = TaskId::generate();
        self.push(id, Box::new(job))?;
        Ok(id)
    }

    /// Enqueues `f` and returns a promise for its result.
    ///
    /// The promise always completes: with `f`'s result, or with
    /// `StoreError::Abandoned` if `f` panicked.
    pub fn submit<T, F>(&self, f: F) -> Result<Promise<T>, QueueError>
    where
        T: Send + 'static,
        F: FnOnce(&mut C) -> Result<T, StoreError> + Send + 'static,
    {
        let id = TaskId::generate();
        let (completer, promise) = Promise::pair(id);
        self.push(
            id,
            Box::new(move |context: &mut C| {
                let result = f(context);
                if let Err(err) = &result {
                    warn!(task_id = %id, error = %err, "task failed");
                }
                completer.complete(result);
            }),
        )?;
        Ok(promise)
    }

    fn push(&self, id: TaskId, job: Job<C>) -> Result<(), QueueError> {
        let lifecycle = lock(&self.lifecycle);
        let worker = match &*lifecycle {
            Lifecycle::Running(worker) => worker,
            Lifecycle::Idle => return Err(QueueError::NotStarted),
            Lifecycle::ShutDown => return Err(QueueError::ShutDown),
        };

        let mut inner = lock(&worker.shared.inner);
        if inner.stopping {
            return Err(QueueError::ShutDown);
        }
        inner.pending.push_back(Queued { id, job });
        drop(inner);

        worker.shared.ready.notify_one();
        trace!(task_id = %id, "task enqueued");
        Ok(())
    }

    /// Stops the worker after draining every queued task.
    pub fn shutdown(&self) -> Result<ShutdownReport, QueueError> {
        self.shutdown_with(|_| {})
    }

    /// Like [`shutdown`](Self::shutdown), and runs `finish` on the context after
    /// the drain (e.g. to release a backend that drained tasks still needed).
    pub fn shutdown_with(
        &self,
        finish: impl FnOnce(&mut C),
    ) -> Result<ShutdownReport, QueueError> {
        let worker = {
            let mut lifecycle = lock(&self.lifecycle);
            match std::mem::replace(&mut *lifecycle, Lifecycle::ShutDown) {
                Lifecycle::Running(worker) => worker,
                Lifecycle::Idle => {
                    *lifecycle = Lifecycle::Idle;
                    return Err(QueueError::NotStarted);
                }
                Lifecycle::ShutDown => return Err(QueueError::ShutDown),
            }
        };
        Ok(self.stop(worker, finish))
    }

    fn stop(&self, worker: WorkerHandle<C>, finish: impl FnOnce(&mut C)) -> ShutdownReport {
        let WorkerHandle {
            shared,
            thread,
            exited,
        } = worker;

        let remaining = {
            let mut inner = lock(&shared.inner);
            inner.stopping = true;
            std::mem::take(&mut inner.pending)
        };
        shared.ready.notify_all();

        info!(remaining = remaining.len(), "shutting down task queue");
        let timeout_ms = self.settings.join_timeout.as_millis() as u64;

        // 実行中のタスクがあればそれが context を手放すまで待つ（最大 join_timeout）
        let deadline = Instant::now() + self.settings.join_timeout;
        let Some(mut context) = worker::lock_until(&shared.context, deadline) else {
            let abandoned = remaining.len();
            // job を drop すると completer も drop され、promise は Abandoned になる
            drop(remaining);
            shared
                .counters
                .abandoned
                .fetch_add(abandoned as u64, Ordering::Relaxed);
            warn!(
                timeout_ms,
                abandoned, "in-flight task did not finish in time; abandoning the worker"
            );
            return ShutdownReport {
                drained: 0,
                joined: false,
                abandoned,
            };
        };

        let drained = remaining.len();
        for task in remaining {
            worker::execute(task, &mut *context, &shared.counters);
            shared.counters.drained.fetch_add(1, Ordering::Relaxed);
        }
        finish(&mut *context);
        drop(context);

        let joined = match exited.recv_timeout(self.settings.join_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if thread.join().is_err() {
                    warn!("worker thread panicked");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(timeout_ms, "worker did not terminate in time; abandoning it");
                false
            }
        };

        info!(drained, joined, "task queue shut down");
        ShutdownReport {
            drained,
            joined,
            abandoned: 0,
        }
    }

    pub fn stats(&self) -> QueueStats {
        let pending = match &*lock(&self.lifecycle) {
            Lifecycle::Running(worker) => lock(&worker.shared.inner).pending.len(),
            Lifecycle::Idle | Lifecycle::ShutDown => 0,
        };
        QueueStats {
            pending,
            executed: self.counters.executed.load(Ordering::Relaxed),
            panicked: self.counters.panicked.load(Ordering::Relaxed),
            drained: self.counters.drained.load(Ordering::Relaxed),
            abandoned: self.counters.abandoned.load(Ordering::Relaxed),
        }
    }
}

impl<C: Send + 'static> Drop for TaskQueue<C> {
    fn drop(&mut self) {
        let lifecycle = self
            .lifecycle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Lifecycle::Running(worker) = std::mem::replace(lifecycle, Lifecycle::ShutDown) {
            warn!("task queue dropped while running; shutting it down");
            self.stop(worker, |_| {});
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings() -> QueueSettings {
        QueueSettings {
            poll_interval: Duration::from_millis(20),
            join_timeout: Duration::from_secs(2),
            thread_name: "hoard-test".to_string(),
        }
    }

    fn started<C: Send + 'static>(context: C) -> TaskQueue<C> {
        let queue = TaskQueue::new(settings());
        queue.start(context).unwrap();
        queue
    }

    #[test]
    fn start_twice_fails_and_returns_context() {
        let queue = started(1u32);
        let err = queue.start(2u32).unwrap_err();
        assert!(matches!(err.error, QueueError::AlreadyStarted));
        assert_eq!(err.context, Some(2));
        queue.shutdown().unwrap();
    }

    #[test]
    fn start_after_shutdown_fails() {
        let queue = started(());
        queue.shutdown().unwrap();
        let err = queue.start(()).unwrap_err();
        assert!(matches!(err.error, QueueError::AlreadyStarted));
    }

    #[test]
    fn enqueue_before_start_fails_fast() {
        let queue: TaskQueue<()> = TaskQueue::new(settings());
        assert!(matches!(queue.enqueue(|_| {}), Err(QueueError::NotStarted)));
        assert!(matches!(
            queue.submit(|_| Ok(())),
            Err(QueueError::NotStarted)
        ));
    }

    #[test]
    fn enqueue_after_shutdown_fails_fast() {
        let queue = started(());
        queue.shutdown().unwrap();
        assert!(matches!(queue.enqueue(|_| {}), Err(QueueError::ShutDown)));
    }

    #[test]
    fn shutdown_errors_instead_of_blocking() {
        let idle: TaskQueue<()> = TaskQueue::new(settings());
        assert!(matches!(idle.shutdown(), Err(QueueError::NotStarted)));
        assert_eq!(idle.state(), QueueState::Idle);

        let queue = started(());
        assert_eq!(queue.state(), QueueState::Running);
        assert!(queue.shutdown().unwrap().joined);
        assert!(matches!(queue.shutdown(), Err(QueueError::ShutDown)));
        assert_eq!(queue.state(), QueueState::ShutDown);
    }

    #[test]
    fn tasks_run_in_submission_order_across_threads() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 50;

        let queue = Arc::new(started(Vec::<usize>::new()));
        // 投入順を決めるための通し番号（ロック中に enqueue する）
        let ticket = Arc::new(Mutex::new(0usize));

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let ticket = Arc::clone(&ticket);
                thread::spawn(move || {
                    for _ in 0..PER_PRODUCER {
                        let mut next = ticket.lock().unwrap();
                        let index = *next;
                        queue.enqueue(move |log: &mut Vec<usize>| log.push(index)).unwrap();
                        *next += 1;
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let mut observed = Vec::new();
        queue
            .shutdown_with(|log| observed = std::mem::take(log))
            .unwrap();

        let expected: Vec<usize> = (0..PRODUCERS * PER_PRODUCER).collect();
        assert_eq!(observed, expected);
    }

    #[test]
    fn never_runs_two_tasks_at_once() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let queue = Arc::new(started(()));

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    for _ in 0..25 {
                        let active = Arc::clone(&active);
                        let peak = Arc::clone(&peak);
                        queue
                            .enqueue(move |_| {
                                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                                peak.fetch_max(now, Ordering::SeqCst);
                                thread::sleep(Duration::from_micros(200));
                                active.fetch_sub(1, Ordering::SeqCst);
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        // drain と実行中タスクが重ならないことも同時に確認する
        queue.shutdown().unwrap();
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(queue.stats().executed, 100);
    }

    #[test]
    fn submit_resolves_with_task_result() {
        let queue = started(10u32);
        let ok = queue.submit(|n: &mut u32| {
            *n += 1;
            Ok(*n)
        });
        let failed = queue.submit(|_: &mut u32| Err::<u32, _>(StoreError::NotInitialized));

        assert_eq!(ok.unwrap().wait().unwrap(), 11);
        assert!(matches!(
            failed.unwrap().wait(),
            Err(StoreError::NotInitialized)
        ));
        queue.shutdown().unwrap();
    }

    #[test]
    fn panicking_task_abandons_its_promise_but_not_the_worker() {
        let queue = started(());
        let boom = queue
            .submit(|_| -> Result<(), StoreError> { panic!("constraint violated") })
            .unwrap();
        let boom_id = boom.task_id();
        let after = queue.submit(|_| Ok("still running")).unwrap();

        assert!(matches!(boom.wait(), Err(StoreError::Abandoned(id)) if id == boom_id));
        assert_eq!(after.wait().unwrap(), "still running");

        queue.shutdown().unwrap();
        let stats = queue.stats();
        assert_eq!(stats.panicked, 1);
        assert_eq!(stats.executed, 1);
    }

    #[test]
    fn shutdown_drains_everything_queued() {
        let queue = started(Vec::<usize>::new());
        // ワーカーを塞いでおき、残りが drain で実行されることを確認する
        queue
            .enqueue(|log: &mut Vec<usize>| {
                thread::sleep(Duration::from_millis(100));
                log.push(0);
            })
            .unwrap();
        for i in 1..=20 {
            queue.enqueue(move |log: &mut Vec<usize>| log.push(i)).unwrap();
        }

        let mut observed = Vec::new();
        let report = queue
            .shutdown_with(|log| observed = log.clone())
            .unwrap();

        assert_eq!(observed, (0..=20).collect::<Vec<_>>());
        assert!(report.drained >= 20);
        assert!(report.joined);
        assert_eq!(queue.stats().drained, report.drained as u64);
    }

    #[test]
    fn shutdown_is_bounded_by_join_timeout_when_a_task_hangs() {
        let queue = TaskQueue::new(QueueSettings {
            join_timeout: Duration::from_millis(100),
            ..settings()
        });
        queue.start(()).unwrap();

        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let hung = queue
            .submit(move |_| {
                entered_tx.send(()).unwrap();
                let _ = release_rx.recv_timeout(Duration::from_secs(10));
                Ok("finished late")
            })
            .unwrap();
        let behind = queue.submit(|_| Ok("never runs")).unwrap();
        entered_rx.recv().unwrap();

        let started_at = Instant::now();
        let report = queue.shutdown().unwrap();
        let elapsed = started_at.elapsed();

        assert!(!report.joined);
        assert_eq!(report.drained, 0);
        assert_eq!(report.abandoned, 1);
        assert!(elapsed < Duration::from_secs(1), "shutdown took {elapsed:?}");
        assert!(matches!(behind.wait(), Err(StoreError::Abandoned(_))));
        assert_eq!(queue.stats().abandoned, 1);

        // 取り残されたタスクも終われば自分の promise は完了させる
        release_tx.send(()).unwrap();
        assert_eq!(hung.wait().unwrap(), "finished late");
    }

    #[test]
    fn idle_worker_exits_promptly_on_shutdown() {
        let queue = started(());
        let started_at = Instant::now();
        queue.shutdown().unwrap();
        assert!(started_at.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn dropping_a_running_queue_drains_it() {
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let queue = started(());
            for i in 0..10 {
                let log = Arc::clone(&log);
                queue.enqueue(move |_| log.lock().unwrap().push(i)).unwrap();
            }
        }
        assert_eq!(*log.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }
}
