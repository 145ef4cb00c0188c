//! MySqlBackend - ネットワーク越しの MySQL / MariaDB（`mysql` feature）
//!
//! 接続プールは mysql クレートに任せる。こちらは min_idle / max_pool_size と
//! タイムアウトを渡すだけ。セッションはプールから借りた接続の上で
//! `START TRANSACTION` … `COMMIT` を張る。
//!
//! id 列は `VARCHAR(191)`（utf8mb4 で index に載る上限）。それより長い id は
//! 切り詰めずに `BackendError::IdTooLong` で弾く。

use chrono::Utc;
use mysql::prelude::Queryable;
use mysql::{Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts, PooledConn};
use tracing::{debug, warn};

use crate::config::{NetworkConfig, PoolConfig};
use crate::ports::{Backend, BackendError, ConnectionParams, Session};

const MAX_ID_LEN: usize = 191;

fn pool_constraints(pool: &PoolConfig) -> Result<PoolConstraints, BackendError> {
    PoolConstraints::new(pool.min_idle, pool.max_pool_size).ok_or_else(|| {
        BackendError::Config(format!(
            "min_idle ({}) must not exceed max_pool_size ({})",
            pool.min_idle, pool.max_pool_size
        ))
    })
}

fn check_id(id: &str) -> Result<(), BackendError> {
    let len = id.chars().count();
    if len > MAX_ID_LEN {
        return Err(BackendError::IdTooLong {
            len,
            max: MAX_ID_LEN,
        });
    }
    Ok(())
}

/// Networked relational backend (MySQL/MariaDB) over a connection pool.
pub struct MySqlBackend {
    config: NetworkConfig,
    pool: Option<Pool>,
}

impl MySqlBackend {
    pub fn new(config: NetworkConfig) -> Self {
        Self { config, pool: None }
    }

    fn build_pool(&self) -> Result<Pool, BackendError> {
        let pool = &self.config.pool;
        let constraints = pool_constraints(pool)?;
        // サーバ側で idle な接続を切らせる（クライアント側プールに idle TTL が無いため）
        let idle_secs = pool.idle_timeout().as_secs().max(1);

        let builder = OptsBuilder::new()
            .ip_or_hostname(Some(self.config.host.clone()))
            .tcp_port(self.config.port)
            .db_name(Some(self.config.database.clone()))
            .user(Some(self.config.user.clone()))
            .pass(Some(self.config.password.clone()))
            .tcp_connect_timeout(Some(pool.connection_timeout()))
            .init(vec![format!("SET SESSION wait_timeout = {idle_secs}")])
            .pool_opts(PoolOpts::default().with_constraints(constraints));

        debug!(
            min_idle = pool.min_idle,
            max_pool_size = pool.max_pool_size,
            max_lifetime_ms = pool.max_lifetime_ms,
            "building mysql pool"
        );
        Ok(Pool::new(Opts::from(builder))?)
    }
}

impl Backend for MySqlBackend {
    fn connect(&mut self, tables: &[String]) -> Result<(), BackendError> {
        let pool = match self.pool.take() {
            Some(pool) => pool,
            None => self.build_pool()?,
        };
        let mut conn = pool.get_conn()?;
        for table in tables {
            conn.query_drop(format!(
                "CREATE TABLE IF NOT EXISTS `{table}` (
                    id VARCHAR(191) NOT NULL PRIMARY KEY,
                    document LONGTEXT NOT NULL,
                    updated_at DATETIME(3) NOT NULL
                )"
            ))?;
            debug!(table = %table, "mysql table ready");
        }
        self.pool = Some(pool);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.pool.is_some()
    }

    fn open_session(&mut self) -> Result<Box<dyn Session + '_>, BackendError> {
        let pool = self.pool.as_ref().ok_or(BackendError::NotConnected)?;
        let mut conn = pool.get_conn()?;
        conn.query_drop("START TRANSACTION")?;
        Ok(Box::new(MySqlSession {
            conn,
            finished: false,
        }))
    }

    fn close(&mut self) {
        // Pool は最後の参照が drop されたときに接続を閉じる
        self.pool = None;
    }

    fn connection_params(&self) -> ConnectionParams {
        ConnectionParams::Network {
            host: self.config.host.clone(),
            port: self.config.port,
            database: self.config.database.clone(),
            user: self.config.user.clone(),
        }
    }
}

struct MySqlSession {
    conn: PooledConn,
    finished: bool,
}

impl Session for MySqlSession {
    fn get(&mut self, table: &str, id: &str) -> Result<Option<String>, BackendError> {
        check_id(id)?;
        let query = format!("SELECT document FROM `{table}` WHERE id = ?");
        Ok(self.conn.exec_first::<String, _, _>(query.as_str(), (id,))?)
    }

    fn put(&mut self, table: &str, id: &str, document: &str) -> Result<(), BackendError> {
        check_id(id)?;
        let query = format!(
            "INSERT INTO `{table}` (id, document, updated_at) VALUES (?, ?, ?)
             ON DUPLICATE KEY UPDATE document = VALUES(document), updated_at = VALUES(updated_at)"
        );
        let updated_at = Utc::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string();
        self.conn
            .exec_drop(query.as_str(), (id, document, updated_at))?;
        Ok(())
    }

    fn list(&mut self, table: &str) -> Result<Vec<String>, BackendError> {
        Ok(self
            .conn
            .query::<String, _>(format!("SELECT document FROM `{table}` ORDER BY id"))?)
    }

    fn commit(self: Box<Self>) -> Result<(), BackendError> {
        let mut session = *self;
        session.conn.query_drop("COMMIT")?;
        session.finished = true;
        Ok(())
    }
}

impl Drop for MySqlSession {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.query_drop("ROLLBACK") {
                warn!(error = %e, "rollback failed");
            }
        }
    }
}
