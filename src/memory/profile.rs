//! 用户画像：全局的键值事实（姓名、偏好、目标……）
//!
//! 不分会话，所有会话共享；由 ProfileExtractor 在每轮结束后异步写入，
//! 由 MemoryAssembler 在每次 Worker 步骤前读取。

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::core::PersistenceError;
use crate::memory::db::{decode_time, encode_time, Database};

/// 单条画像事实
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileFact {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// 插入或覆盖；key / value 去除首尾空白，空 key 或空 value 忽略
    async fn upsert(&self, key: &str, value: &str) -> Result<(), PersistenceError>;

    /// 全部事实，按 key 排序
    async fn get_all(&self) -> Result<BTreeMap<String, String>, PersistenceError>;

    /// 全部事实（含更新时间），按 key 排序
    async fn facts(&self) -> Result<Vec<ProfileFact>, PersistenceError>;
}

pub struct SqliteProfileStore {
    db: Database,
}

impl SqliteProfileStore {
    pub fn open(db: Database) -> Result<Self, PersistenceError> {
        db.init(
            "CREATE TABLE IF NOT EXISTS user_profile (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )?;
        Ok(Self { db })
    }
}

#[async_trait]
impl ProfileStore for SqliteProfileStore {
    async fn upsert(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let key = key.trim().to_string();
        let value = value.trim().to_string();
        if key.is_empty() || value.is_empty() {
            tracing::debug!(key = %key, "skipping empty profile fact");
            return Ok(());
        }
        let now = encode_time(Utc::now());
        self.db
            .run(move |conn| {
                conn.execute(
                    "INSERT INTO user_profile (key, value, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                    params![key, value, now],
                )?;
                Ok(())
            })
            .await
    }

    async fn get_all(&self) -> Result<BTreeMap<String, String>, PersistenceError> {
        Ok(self
            .facts()
            .await?
            .into_iter()
            .map(|f| (f.key, f.value))
            .collect())
    }

    async fn facts(&self) -> Result<Vec<ProfileFact>, PersistenceError> {
        self.db
            .run(|conn| {
                let mut stmt =
                    conn.prepare("SELECT key, value, updated_at FROM user_profile ORDER BY key")?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?;
                let mut facts = Vec::new();
                for row in rows {
                    let (key, value, updated_at) = row?;
                    facts.push(ProfileFact {
                        key,
                        value,
                        updated_at: decode_time(&updated_at)?,
                    });
                }
                Ok(facts)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn upsert_trims_and_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = SqliteProfileStore::open(Database::new(dir.path().join("p.db"))).unwrap();

        store.upsert("  name ", " Ada ").await.unwrap();
        store.upsert("name", "Ada Lovelace").await.unwrap();
        store.upsert("   ", "ignored").await.unwrap();

        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["name"], "Ada Lovelace");
    }
}
