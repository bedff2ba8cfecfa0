//! 按会话保存的用户可见对话记录
//!
//! 每轮成功结束后追加一对 (user, assistant)，只保存最终回答，不含能力调用与 Evaluator 反馈。
//! 用于 UI 恢复历史，以及 MemoryAssembler 的「最近对话」片段。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::core::PersistenceError;
use crate::memory::db::{decode_time, encode_time, Database};
use crate::memory::Role;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait TranscriptStore: Send + Sync {
    /// 原子地追加一对消息
    async fn append(
        &self,
        session_id: &str,
        user_message: &str,
        assistant_reply: &str,
    ) -> Result<(), PersistenceError>;

    /// 最近 limit 条，按时间正序
    async fn recent(&self, session_id: &str, limit: usize)
        -> Result<Vec<TranscriptEntry>, PersistenceError>;

    /// 全部记录，按时间正序
    async fn all(&self, session_id: &str) -> Result<Vec<TranscriptEntry>, PersistenceError>;
}

pub struct SqliteTranscriptStore {
    db: Database,
}

impl SqliteTranscriptStore {
    pub fn open(db: Database) -> Result<Self, PersistenceError> {
        db.init(
            "CREATE TABLE IF NOT EXISTS chat_history (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role       TEXT NOT NULL,
                content    TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chat_history_session ON chat_history (session_id, id);",
        )?;
        Ok(Self { db })
    }
}

type RawEntry = (String, String, String);

fn decode_entries(rows: Vec<RawEntry>) -> Result<Vec<TranscriptEntry>, PersistenceError> {
    rows.into_iter()
        .map(|(role, content, created_at)| {
            Ok(TranscriptEntry {
                role: Role::parse(&role)
                    .ok_or_else(|| PersistenceError::Corrupt(format!("role {role:?}")))?,
                content,
                created_at: decode_time(&created_at)?,
            })
        })
        .collect()
}

#[async_trait]
impl TranscriptStore for SqliteTranscriptStore {
    async fn append(
        &self,
        session_id: &str,
        user_message: &str,
        assistant_reply: &str,
    ) -> Result<(), PersistenceError> {
        let session_id = session_id.to_string();
        let user_message = user_message.to_string();
        let assistant_reply = assistant_reply.to_string();
        let now = encode_time(Utc::now());
        self.db
            .run(move |conn| {
                let tx = conn.transaction()?;
                for (role, content) in [(Role::User, &user_message), (Role::Assistant, &assistant_reply)] {
                    tx.execute(
                        "INSERT INTO chat_history (session_id, role, content, created_at)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![session_id, role.as_str(), content, now],
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
    }

    async fn recent(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<TranscriptEntry>, PersistenceError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let session_id = session_id.to_string();
        let rows = self
            .db
            .run(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT role, content, created_at FROM (
                        SELECT id, role, content, created_at FROM chat_history
                        WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2
                     ) ORDER BY id ASC",
                )?;
                let rows = stmt
                    .query_map(params![session_id, limit as i64], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                    })?
                    .collect::<Result<Vec<RawEntry>, _>>()?;
                Ok(rows)
            })
            .await?;
        decode_entries(rows)
    }

    async fn all(&self, session_id: &str) -> Result<Vec<TranscriptEntry>, PersistenceError> {
        let session_id = session_id.to_string();
        let rows = self
            .db
            .run(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT role, content, created_at FROM chat_history
                     WHERE session_id = ?1 ORDER BY id ASC",
                )?;
                let rows = stmt
                    .query_map(params![session_id], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                    })?
                    .collect::<Result<Vec<RawEntry>, _>>()?;
                Ok(rows)
            })
            .await?;
        decode_entries(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn recent_returns_tail_in_order_per_session() {
        let dir = TempDir::new().unwrap();
        let store = SqliteTranscriptStore::open(Database::new(dir.path().join("t.db"))).unwrap();
        for i in 0..3 {
            store.append("s1", &format!("q{i}"), &format!("a{i}")).await.unwrap();
        }
        store.append("s2", "other", "other").await.unwrap();

        let recent = store.recent("s1", 3).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["a1", "q2", "a2"]);
        assert_eq!(recent[1].role, Role::User);

        assert_eq!(store.all("s1").await.unwrap().len(), 6);
        assert!(store.recent("s1", 0).await.unwrap().is_empty());
        assert!(store.all("missing").await.unwrap().is_empty());
    }
}
