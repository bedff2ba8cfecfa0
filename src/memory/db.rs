//! SQLite 连接辅助
//!
//! 每次操作打开一条短连接并在阻塞线程池中执行，异步调用方不会阻塞运行时。
//! 多个存储可以共享同一个数据库文件，各自在 open 时建表。

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

use crate::core::PersistenceError;

#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    /// 同步建表；只在构造存储时调用一次
    pub(crate) fn init(&self, ddl: &str) -> Result<(), PersistenceError> {
        self.connect()?.execute_batch(ddl)?;
        Ok(())
    }

    /// 在阻塞线程池中执行一次数据库操作
    pub(crate) async fn run<T, F>(&self, op: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, PersistenceError> + Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = db.connect()?;
            op(&mut conn)
        })
        .await
        .map_err(|e| PersistenceError::Unavailable(e.to_string()))?
    }
}

/// 时间戳统一存为 RFC 3339（微秒、UTC），字典序即时间序
pub(crate) fn encode_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_time(raw: &str) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PersistenceError::Corrupt(format!("timestamp {raw:?}: {e}")))
}
