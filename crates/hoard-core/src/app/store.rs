//! EntityStore - エンティティ 1 種類ぶんの save / load / initialize / close
//!
//! # 設計
//! - バックエンドは `initialize()` で TaskQueue に渡し、以後はワーカーだけが触る
//! - `save` / `load` は呼び出し元スレッドでは状態チェックと enqueue しかしない（ブロックしない）
//! - タスク 1 件 = セッション 1 つ = トランザクション 1 つ
//! - `close()` は残タスクを全部流してからバックエンドを閉じる
//! - `initialize()` は接続中 lifecycle のロックを持たない（`Initializing`）。
//!   その間ほかのスレッドの `save` / `state` は `NotInitialized` ですぐ返る
//!
//! # フロー
//! ```text
//! caller ──save(e)──▶ [状態チェック] ──submit──▶ TaskQueue ──▶ worker
//!                                                         open_session → put → commit
//!        ◀──────────── Promise<E> ◀──────────── complete ◀──┘
//! ```

use std::marker::PhantomData;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info, warn};

use super::builder::StoreBuilder;
use crate::domain::codec;
use crate::domain::{Entity, EntityFactory, StoreState, TableFormat};
use crate::error::StoreError;
use crate::observability::QueueStats;
use crate::ports::{Backend, ConnectionParams};
use crate::queue::{Promise, QueueSettings, TaskQueue};

enum Lifecycle<B: Backend> {
    Uninitialized(B),
    /// `initialize()` owns the backend and is connecting without the lock.
    Initializing,
    Initialized { table: Arc<str>, queue: TaskQueue<B> },
    Closed,
}

/// Asynchronous persistence facade for one entity type over one backend.
///
/// Safe to share between threads (`Arc<EntityStore<_, _>>`); every operation
/// is serialized onto the store's single worker thread.
pub struct EntityStore<E: Entity, B: Backend> {
    lifecycle: Mutex<Lifecycle<B>>,
    /// Signalled when an `Initializing` store settles.
    settled: Condvar,
    factory: EntityFactory<E>,
    table_format: TableFormat,
    queue_settings: QueueSettings,
    connection: ConnectionParams,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity, B: Backend> EntityStore<E, B> {
    pub fn builder(backend: B) -> StoreBuilder<E, B> {
        StoreBuilder::new(backend)
    }

    pub(crate) fn from_parts(
        backend: B,
        factory: EntityFactory<E>,
        table_format: TableFormat,
        queue_settings: QueueSettings,
    ) -> Self {
        Self {
            connection: backend.connection_params(),
            lifecycle: Mutex::new(Lifecycle::Uninitialized(backend)),
            settled: Condvar::new(),
            factory,
            table_format,
            queue_settings,
            _entity: PhantomData,
        }
    }

    /// Connects the backend, creates the table, and starts the worker.
    ///
    /// Returns `false` on any setup failure and stays `Uninitialized`, so the
    /// caller may retry. Already initialized: `true`. Closed: `false`.
    /// A concurrent call waits for the one in progress and reports its outcome.
    pub fn initialize(&self) -> bool {
        let backend = {
            let mut lifecycle = self.lock();
            loop {
                match std::mem::replace(&mut *lifecycle, Lifecycle::Initializing) {
                    Lifecycle::Uninitialized(backend) => break backend,
                    Lifecycle::Initializing => {
                        lifecycle = self
                            .settled
                            .wait(lifecycle)
                            .unwrap_or_else(PoisonError::into_inner);
                    }
                    initialized @ Lifecycle::Initialized { .. } => {
                        *lifecycle = initialized;
                        return true;
                    }
                    Lifecycle::Closed => {
                        *lifecycle = Lifecycle::Closed;
                        warn!(entity = E::NAME, "initialize called on a closed store");
                        return false;
                    }
                }
            }
        };

        let outcome = self.bring_up(backend);
        let ok = matches!(outcome, Lifecycle::Initialized { .. });
        *self.lock() = outcome;
        self.settled.notify_all();
        ok
    }

    /// Runs without the lifecycle lock; the backend may block on I/O here.
    fn bring_up(&self, mut backend: B) -> Lifecycle<B> {
        let table = match self.table_format.resolve(E::NAME) {
            Ok(table) => table,
            Err(e) => {
                error!(entity = E::NAME, error = %e, "invalid table name");
                return Lifecycle::Uninitialized(backend);
            }
        };

        if let Err(e) = backend.connect(std::slice::from_ref(&table)) {
            error!(
                entity = E::NAME,
                backend = %self.connection,
                error = %e,
                "failed to initialize backend"
            );
            backend.close();
            return Lifecycle::Uninitialized(backend);
        }

        let queue = TaskQueue::new(self.queue_settings.clone());
        if let Err(e) = queue.start(backend) {
            error!(entity = E::NAME, error = %e, "failed to start task queue");
            return match e.context {
                Some(mut backend) => {
                    backend.close();
                    Lifecycle::Uninitialized(backend)
                }
                // バックエンドを取り戻せなければ再初期化はできない
                None => Lifecycle::Closed,
            };
        }

        info!(
            entity = E::NAME,
            table = %table,
            backend = %self.connection,
            "entity store initialized"
        );
        Lifecycle::Initialized {
            table: table.into(),
            queue,
        }
    }

    /// Is the backend session live (`save` / `load` accepted)?
    pub fn initialized(&self) -> bool {
        self.state().accepts_operations()
    }

    pub fn state(&self) -> StoreState {
        match &*self.lock() {
            Lifecycle::Uninitialized(_) | Lifecycle::Initializing => StoreState::Uninitialized,
            Lifecycle::Initialized { .. } => StoreState::Initialized,
            Lifecycle::Closed => StoreState::Closed,
        }
    }

    /// Upserts `entity` (full replace) and resolves with it once committed.
    pub fn save(&self, entity: E) -> Result<Promise<E>, StoreError> {
        self.submit(move |backend, table| {
            let document = codec::encode(&entity)?;
            let mut session = backend.open_session()?;
            session.put(table, entity.id(), &document)?;
            session.commit()?;
            debug!(entity = E::NAME, id = entity.id(), "saved");
            Ok(entity)
        })
    }

    /// `load_with(id, true)`: always resolves with an entity.
    pub fn load(&self, id: impl Into<String>) -> Result<Promise<E>, StoreError> {
        let id = id.into();
        let factory = Arc::clone(&self.factory);
        self.submit(move |backend, table| find_or_create(backend, table, &id, &factory))
    }

    /// Looks `id` up. When absent, persists and returns the default entity if
    /// `create_if_missing`, otherwise resolves with `None` and writes nothing.
    pub fn load_with(
        &self,
        id: impl Into<String>,
        create_if_missing: bool,
    ) -> Result<Promise<Option<E>>, StoreError> {
        let id = id.into();
        if create_if_missing {
            let factory = Arc::clone(&self.factory);
            self.submit(move |backend, table| {
                find_or_create(backend, table, &id, &factory).map(Some)
            })
        } else {
            self.submit(move |backend, table| find::<E, B>(backend, table, &id))
        }
    }

    /// Every stored entity of this type, ordered by id.
    pub fn load_all(&self) -> Result<Promise<Vec<E>>, StoreError> {
        self.submit(|backend, table| {
            let mut session = backend.open_session()?;
            let documents = session.list(table)?;
            session.commit()?;
            documents.iter().map(|d| codec::decode::<E>(d)).collect()
        })
    }

    /// Drains every queued task, then closes the backend.
    pub fn close(&self) -> Result<(), StoreError> {
        let queue = {
            let mut lifecycle = self.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Closed) {
                Lifecycle::Initialized { queue, .. } => queue,
                uninitialized @ (Lifecycle::Uninitialized(_) | Lifecycle::Initializing) => {
                    *lifecycle = uninitialized;
                    return Err(StoreError::NotInitialized);
                }
                Lifecycle::Closed => return Err(StoreError::Closed),
            }
        };

        let report = queue.shutdown_with(|backend| backend.close())?;
        if report.joined {
            info!(entity = E::NAME, drained = report.drained, "entity store closed");
        } else {
            warn!(
                entity = E::NAME,
                drained = report.drained,
                abandoned = report.abandoned,
                "entity store closed without its worker finishing"
            );
        }
        Ok(())
    }

    /// The physical table name, once initialized.
    pub fn table(&self) -> Option<String> {
        match &*self.lock() {
            Lifecycle::Initialized { table, .. } => Some(table.to_string()),
            Lifecycle::Uninitialized(_) | Lifecycle::Initializing | Lifecycle::Closed => None,
        }
    }

    pub fn stats(&self) -> Option<QueueStats> {
        match &*self.lock() {
            Lifecycle::Initialized { queue, .. } => Some(queue.stats()),
            Lifecycle::Uninitialized(_) | Lifecycle::Initializing | Lifecycle::Closed => None,
        }
    }

    pub fn table_format(&self) -> &TableFormat {
        &self.table_format
    }

    pub fn queue_settings(&self) -> &QueueSettings {
        &self.queue_settings
    }

    pub fn connection_params(&self) -> &ConnectionParams {
        &self.connection
    }

    fn submit<T, F>(&self, task: F) -> Result<Promise<T>, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut B, &str) -> Result<T, StoreError> + Send + 'static,
    {
        let lifecycle = self.lock();
        match &*lifecycle {
            Lifecycle::Initialized { table, queue } => {
                let table = Arc::clone(table);
                Ok(queue.submit(move |backend: &mut B| task(backend, &table))?)
            }
            Lifecycle::Uninitialized(_) | Lifecycle::Initializing => {
                Err(StoreError::NotInitialized)
            }
            Lifecycle::Closed => Err(StoreError::Closed),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle<B>> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E: Entity, B: Backend> Drop for EntityStore<E, B> {
    fn drop(&mut self) {
        let lifecycle = self
            .lifecycle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Lifecycle::Initialized { queue, .. } = std::mem::replace(lifecycle, Lifecycle::Closed)
        {
            warn!(entity = E::NAME, "entity store dropped without close(); closing it");
            if let Err(e) = queue.shutdown_with(|backend| backend.close()) {
                warn!(entity = E::NAME, error = %e, "failed to shut down task queue");
            }
        }
    }
}

fn find<E: Entity, B: Backend>(
    backend: &mut B,
    table: &str,
    id: &str,
) -> Result<Option<E>, StoreError> {
    let mut session = backend.open_session()?;
    let found = session.get(table, id)?;
    session.commit()?;
    found.map(|document| codec::decode(&document)).transpose()
}

fn find_or_create<E: Entity, B: Backend>(
    backend: &mut B,
    table: &str,
    id: &str,
    factory: &EntityFactory<E>,
) -> Result<E, StoreError> {
    let mut session = backend.open_session()?;
    if let Some(document) = session.get(table, id)? {
        session.commit()?;
        return codec::decode(&document);
    }

    let entity = factory(id);
    if entity.id() != id {
        // 行の key と document の id は常に一致させる
        return Err(StoreError::IdMismatch {
            entity: E::NAME,
            requested: id.to_string(),
            produced: entity.id().to_string(),
        });
    }
    let document = codec::encode(&entity)?;
    session.put(table, id, &document)?;
    session.commit()?;
    debug!(entity = E::NAME, id, "created default entity");
    Ok(entity)
}
