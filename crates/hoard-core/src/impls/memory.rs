//! MemoryBackend - プロセス内メモリだけで完結するバックエンド
//!
//! テストとデモ用。Clone したハンドル同士は同じデータを共有するので、
//! ストアを close した後でも中身を確認できる。
//!
//! # 実装詳細
//! - テーブルごとに BTreeMap<id, document>（list が id 順になる）
//! - セッションは書き込みを手元に溜め、commit で一括反映
//! - commit されずに drop されたセッションの書き込みは捨てられる

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::ports::{Backend, BackendError, ConnectionParams, Session};

type Tables = HashMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    data: Arc<Mutex<Tables>>,
    open: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed `(id, document)` rows of `table`, ordered by id.
    pub fn rows(&self, table: &str) -> Vec<(String, String)> {
        self.lock()
            .get(table)
            .map(|rows| rows.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    pub fn tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Backend for MemoryBackend {
    fn connect(&mut self, tables: &[String]) -> Result<(), BackendError> {
        let mut data = self.lock();
        for table in tables {
            data.entry(table.clone()).or_default();
        }
        drop(data);
        self.open = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn open_session(&mut self) -> Result<Box<dyn Session + '_>, BackendError> {
        if !self.open {
            return Err(BackendError::NotConnected);
        }
        Ok(Box::new(MemorySession {
            data: &self.data,
            writes: Vec::new(),
        }))
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn connection_params(&self) -> ConnectionParams {
        ConnectionParams::Memory
    }
}

struct MemorySession<'a> {
    data: &'a Mutex<Tables>,
    /// (table, id, document) in write order
    writes: Vec<(String, String, String)>,
}

impl MemorySession<'_> {
    fn committed(&self) -> MutexGuard<'_, Tables> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Session for MemorySession<'_> {
    fn get(&mut self, table: &str, id: &str) -> Result<Option<String>, BackendError> {
        let staged = self
            .writes
            .iter()
            .rev()
            .find(|(t, i, _)| t == table && i == id)
            .map(|(_, _, document)| document.clone());
        if staged.is_some() {
            return Ok(staged);
        }
        let data = self.committed();
        let rows = data
            .get(table)
            .ok_or_else(|| BackendError::UnknownTable(table.to_string()))?;
        Ok(rows.get(id).cloned())
    }

    fn put(&mut self, table: &str, id: &str, document: &str) -> Result<(), BackendError> {
        if !self.committed().contains_key(table) {
            return Err(BackendError::UnknownTable(table.to_string()));
        }
        self.writes
            .push((table.to_string(), id.to_string(), document.to_string()));
        Ok(())
    }

    fn list(&mut self, table: &str) -> Result<Vec<String>, BackendError> {
        let mut rows = self
            .committed()
            .get(table)
            .cloned()
            .ok_or_else(|| BackendError::UnknownTable(table.to_string()))?;
        for (t, id, document) in &self.writes {
            if t == table {
                rows.insert(id.clone(), document.clone());
            }
        }
        Ok(rows.into_values().collect())
    }

    fn commit(self: Box<Self>) -> Result<(), BackendError> {
        let mut data = self.committed();
        for (table, id, document) in &self.writes {
            data.entry(table.clone())
                .or_default()
                .insert(id.clone(), document.clone());
        }
        Ok(())
    }
}
