//! SqliteBackend - 組み込みファイル DB（rusqlite）
//!
//! 接続は 1 本だけ。ワーカースレッドが唯一の利用者なのでプールは持たない。
//! テーブルは `id TEXT PRIMARY KEY, document TEXT, updated_at TEXT` の形で
//! `connect` 時に無ければ作る。

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use tracing::{debug, warn};

use crate::ports::{Backend, BackendError, ConnectionParams, Session};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    File(PathBuf),
    Memory,
}

/// Embedded file-based backend: a single SQLite connection.
#[derive(Debug)]
pub struct SqliteBackend {
    location: Location,
    conn: Option<Connection>,
}

impl SqliteBackend {
    /// Backend for the database file at `path` (created on connect if missing).
    pub fn open_file(path: impl AsRef<Path>) -> Self {
        Self {
            location: Location::File(path.as_ref().to_path_buf()),
            conn: None,
        }
    }

    /// Private in-memory database, gone once the backend is closed.
    pub fn in_memory() -> Self {
        Self {
            location: Location::Memory,
            conn: None,
        }
    }

    fn open_connection(&self) -> Result<Connection, BackendError> {
        let conn = match &self.location {
            Location::File(path) => Connection::open(path)?,
            Location::Memory => Connection::open_in_memory()?,
        };
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }
}

impl Backend for SqliteBackend {
    fn connect(&mut self, tables: &[String]) -> Result<(), BackendError> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => self.open_connection()?,
        };
        for table in tables {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS \"{table}\" (
                    id TEXT PRIMARY KEY NOT NULL,
                    document TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );"
            ))?;
            debug!(table = %table, "sqlite table ready");
        }
        self.conn = Some(conn);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    fn open_session(&mut self) -> Result<Box<dyn Session + '_>, BackendError> {
        let conn = self.conn.as_mut().ok_or(BackendError::NotConnected)?;
        Ok(Box::new(SqliteSession {
            tx: conn.transaction()?,
        }))
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err((_conn, e)) = conn.close() {
                warn!(error = %e, "failed to close sqlite connection cleanly");
            }
        }
    }

    fn connection_params(&self) -> ConnectionParams {
        let path = match &self.location {
            Location::File(path) => path.display().to_string(),
            Location::Memory => ":memory:".to_string(),
        };
        ConnectionParams::File { path }
    }
}

struct SqliteSession<'c> {
    tx: Transaction<'c>,
}

impl Session for SqliteSession<'_> {
    fn get(&mut self, table: &str, id: &str) -> Result<Option<String>, BackendError> {
        let document = self
            .tx
            .query_row(
                &format!("SELECT document FROM \"{table}\" WHERE id = ?1"),
                params![id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(document)
    }

    fn put(&mut self, table: &str, id: &str, document: &str) -> Result<(), BackendError> {
        self.tx.execute(
            &format!(
                "INSERT INTO \"{table}\" (id, document, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                    document = excluded.document,
                    updated_at = excluded.updated_at"
            ),
            params![id, document, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn list(&mut self, table: &str) -> Result<Vec<String>, BackendError> {
        let mut stmt = self
            .tx
            .prepare(&format!("SELECT document FROM \"{table}\" ORDER BY id"))?;
        let documents = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(documents)
    }

    fn commit(self: Box<Self>) -> Result<(), BackendError> {
        let SqliteSession { tx } = *self;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tables() -> Vec<String> {
        vec!["profile".to_string()]
    }

    #[test]
    fn upsert_then_read_back() {
        let mut backend = SqliteBackend::in_memory();
        backend.connect(&tables()).unwrap();

        let mut session = backend.open_session().unwrap();
        assert_eq!(session.get("profile", "a").unwrap(), None);
        session.put("profile", "a", "{\"coins\":1}").unwrap();
        session.put("profile", "a", "{\"coins\":2}").unwrap();
        session.commit().unwrap();

        let mut session = backend.open_session().unwrap();
        assert_eq!(
            session.get("profile", "a").unwrap().as_deref(),
            Some("{\"coins\":2}")
        );
        assert_eq!(session.list("profile").unwrap().len(), 1);
    }

    #[test]
    fn uncommitted_session_rolls_back() {
        let mut backend = SqliteBackend::in_memory();
        backend.connect(&tables()).unwrap();
        {
            let mut session = backend.open_session().unwrap();
            session.put("profile", "a", "{}").unwrap();
        }
        let mut session = backend.open_session().unwrap();
        assert_eq!(session.get("profile", "a").unwrap(), None);
    }

    #[test]
    fn list_is_ordered_by_id() {
        let mut backend = SqliteBackend::in_memory();
        backend.connect(&tables()).unwrap();
        let mut session = backend.open_session().unwrap();
        for id in ["c", "a", "b"] {
            session.put("profile", id, &format!("\"{id}\"")).unwrap();
        }
        assert_eq!(
            session.list("profile").unwrap(),
            vec!["\"a\"", "\"b\"", "\"c\""]
        );
    }

    #[test]
    fn file_database_survives_reconnect() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hoard.sqlite");

        let mut backend = SqliteBackend::open_file(&path);
        backend.connect(&tables()).unwrap();
        let mut session = backend.open_session().unwrap();
        session.put("profile", "a", "{}").unwrap();
        session.commit().unwrap();
        backend.close();
        assert!(!backend.is_open());

        let mut reopened = SqliteBackend::open_file(&path);
        reopened.connect(&tables()).unwrap();
        let mut session = reopened.open_session().unwrap();
        assert_eq!(session.get("profile", "a").unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn session_before_connect_is_rejected() {
        let mut backend = SqliteBackend::in_memory();
        assert!(matches!(
            backend.open_session().err(),
            Some(BackendError::NotConnected)
        ));
    }

    #[test]
    fn params_show_the_file_path() {
        let backend = SqliteBackend::open_file("/srv/mc/data.sqlite");
        assert_eq!(
            backend.connection_params().to_string(),
            "sqlite:///srv/mc/data.sqlite"
        );
    }
}
