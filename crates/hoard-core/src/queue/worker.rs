//! Worker loop - キューの先頭から 1 件ずつ取り出して実行する
//!
//! # フロー
//! 1. inner ロックを取り、stopping なら抜ける
//! 2. 先頭タスクを pop（なければ Condvar で poll_interval だけ待つ）
//! 3. context ロックを取ってから inner ロックを手放す
//! 4. タスク実行（panic は catch して次へ）
//!
//! 3 の順序が重要: shutdown 側は inner を取った時点で「実行中のタスクは
//! context を握っている」ことが保証されるので、drain が追い越すことはない。

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error};

use super::Job;
use crate::domain::TaskId;

pub(crate) struct Queued<C> {
    pub(crate) id: TaskId,
    pub(crate) job: Job<C>,
}

pub(crate) struct Inner<C> {
    pub(crate) pending: VecDeque<Queued<C>>,
    pub(crate) stopping: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) executed: AtomicU64,
    pub(crate) panicked: AtomicU64,
    pub(crate) drained: AtomicU64,
    pub(crate) abandoned: AtomicU64,
}

/// State shared between the queue handle and its worker thread.
pub(crate) struct Shared<C> {
    pub(crate) inner: Mutex<Inner<C>>,
    pub(crate) ready: Condvar,
    /// Held for the whole execution of a task: one task at a time.
    pub(crate) context: Mutex<C>,
    pub(crate) counters: Arc<Counters>,
}

impl<C> Shared<C> {
    pub(crate) fn new(context: C, counters: Arc<Counters>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                pending: VecDeque::new(),
                stopping: false,
            }),
            ready: Condvar::new(),
            context: Mutex::new(context),
            counters,
        }
    }

    pub(crate) fn into_context(self) -> C {
        self.context
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

const LOCK_POLL: Duration = Duration::from_millis(5);

/// Like [`lock`], but gives up at `deadline`.
pub(crate) fn lock_until<T>(mutex: &Mutex<T>, deadline: Instant) -> Option<MutexGuard<'_, T>> {
    loop {
        match mutex.try_lock() {
            Ok(guard) => return Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => return Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) if Instant::now() >= deadline => return None,
            Err(TryLockError::WouldBlock) => thread::sleep(LOCK_POLL),
        }
    }
}

pub(crate) fn run<C>(shared: Arc<Shared<C>>, poll_interval: Duration) {
    debug!("worker started");
    loop {
        let mut inner = lock(&shared.inner);
        let task = loop {
            if inner.stopping {
                debug!("worker stopping");
                return;
            }
            if let Some(task) = inner.pending.pop_front() {
                break task;
            }
            inner = shared
                .ready
                .wait_timeout(inner, poll_interval)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        };

        let mut context = lock(&shared.context);
        drop(inner);
        execute(task, &mut *context, &shared.counters);
    }
}

/// Runs one task against the context. A panic is logged and swallowed.
pub(crate) fn execute<C>(task: Queued<C>, context: &mut C, counters: &Counters) {
    let Queued { id, job } = task;
    let started = Instant::now();
    match panic::catch_unwind(AssertUnwindSafe(|| job(context))) {
        Ok(()) => {
            counters.executed.fetch_add(1, Ordering::Relaxed);
            debug!(
                task_id = %id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "task finished"
            );
        }
        Err(payload) => {
            counters.panicked.fetch_add(1, Ordering::Relaxed);
            error!(
                task_id = %id,
                panic = panic_message(payload.as_ref()),
                "task panicked; continuing with the next task"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}
