//! 会话目录：id、名称、创建时间
//!
//! 会话 id 同时作为检查点的 thread_id 与对话记录的分组键。

use chrono::{DateTime, Local, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::PersistenceError;
use crate::memory::db::{decode_time, encode_time, Database};

pub const DEFAULT_SESSION_NAME: &str = "Default Session";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// 未指定名称时使用创建时刻的本地时间
pub fn default_session_name(at: DateTime<Local>) -> String {
    format!("Session – {}", at.format("%b %d, %H:%M"))
}

#[derive(Clone)]
pub struct SessionStore {
    db: Database,
}

impl SessionStore {
    pub fn open(db: Database) -> Result<Self, PersistenceError> {
        db.init(
            "CREATE TABLE IF NOT EXISTS sessions (
                seq        INTEGER PRIMARY KEY AUTOINCREMENT,
                id         TEXT NOT NULL UNIQUE,
                name       TEXT NOT NULL,
                created_at TEXT NOT NULL
            );",
        )?;
        Ok(Self { db })
    }

    pub async fn create(&self, name: Option<&str>) -> Result<Session, PersistenceError> {
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(String::from)
            .unwrap_or_else(|| default_session_name(Local::now()));
        let session = Session {
            id: Uuid::new_v4().to_string(),
            name,
            created_at: Utc::now(),
        };
        let (id, name, created_at) = (
            session.id.clone(),
            session.name.clone(),
            encode_time(session.created_at),
        );
        self.db
            .run(move |conn| {
                conn.execute(
                    "INSERT INTO sessions (id, name, created_at) VALUES (?1, ?2, ?3)",
                    params![id, name, created_at],
                )?;
                Ok(())
            })
            .await?;
        tracing::info!(session_id = %session.id, name = %session.name, "session created");
        Ok(session)
    }

    /// 改名；名称去除首尾空白，为空时不修改。返回是否找到该会话
    pub async fn rename(&self, id: &str, name: &str) -> Result<bool, PersistenceError> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Ok(false);
        }
        let id = id.to_string();
        self.db
            .run(move |conn| {
                let changed =
                    conn.execute("UPDATE sessions SET name = ?1 WHERE id = ?2", params![name, id])?;
                Ok(changed > 0)
            })
            .await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Session>, PersistenceError> {
        let id = id.to_string();
        let raw = self
            .db
            .run(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, name, created_at FROM sessions WHERE id = ?1",
                        params![id],
                        |row| Ok::<RawSession, _>((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .optional()?)
            })
            .await?;
        raw.map(decode_session).transpose()
    }

    /// 最新的会话排在前面
    pub async fn list(&self) -> Result<Vec<Session>, PersistenceError> {
        let raws = self
            .db
            .run(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, created_at FROM sessions ORDER BY created_at DESC, seq DESC",
                )?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                    .collect::<Result<Vec<RawSession>, _>>()?;
                Ok(rows)
            })
            .await?;
        raws.into_iter().map(decode_session).collect()
    }

    /// 最新会话；一个都没有时创建 "Default Session"
    pub async fn get_or_create_latest(&self) -> Result<Session, PersistenceError> {
        match self.list().await?.into_iter().next() {
            Some(session) => Ok(session),
            None => self.create(Some(DEFAULT_SESSION_NAME)).await,
        }
    }
}

type RawSession = (String, String, String);

fn decode_session((id, name, created_at): RawSession) -> Result<Session, PersistenceError> {
    Ok(Session {
        id,
        name,
        created_at: decode_time(&created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> SessionStore {
        SessionStore::open(Database::new(dir.path().join("s.db"))).unwrap()
    }

    #[test]
    fn default_name_uses_month_day_and_time() {
        let at = Local.with_ymd_and_hms(2026, 3, 7, 9, 5, 0).unwrap();
        assert_eq!(default_session_name(at), "Session – Mar 07, 09:05");
    }

    #[tokio::test]
    async fn latest_is_created_once_then_reused() {
        let dir = TempDir::new().unwrap();
        let sessions = store(&dir);
        let first = sessions.get_or_create_latest().await.unwrap();
        assert_eq!(first.name, DEFAULT_SESSION_NAME);
        let again = sessions.get_or_create_latest().await.unwrap();
        assert_eq!(first.id, again.id);

        let newer = sessions.create(None).await.unwrap();
        assert_eq!(sessions.get_or_create_latest().await.unwrap().id, newer.id);
        assert_eq!(sessions.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn rename_trims_and_ignores_blank() {
        let dir = TempDir::new().unwrap();
        let sessions = store(&dir);
        let s = sessions.create(Some("  Trip  ")).await.unwrap();
        assert_eq!(s.name, "Trip");

        assert!(sessions.rename(&s.id, "  Japan trip ").await.unwrap());
        assert!(!sessions.rename(&s.id, "   ").await.unwrap());
        assert!(!sessions.rename("missing", "x").await.unwrap());
        assert_eq!(sessions.get(&s.id).await.unwrap().unwrap().name, "Japan trip");
    }
}
