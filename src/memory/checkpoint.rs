//! 线程检查点
//!
//! 每个步骤结束后保存一次 (下一步骤, TurnState)，以 thread_id（即会话 id）分组，
//! parent_id 串起同一线程内的检查点链。进程重启后以最新检查点恢复线程。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{PersistenceError, Step, TurnState};
use crate::memory::db::{decode_time, encode_time, Database};

/// 检查点格式版本；state 结构不兼容变化时递增
pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub thread_id: String,
    pub parent_id: Option<String>,
    pub version: u32,
    /// 恢复时从哪一步继续；Terminal 表示该轮已结束
    pub next_step: Step,
    pub state: TurnState,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(
        &self,
        thread_id: &str,
        next_step: Step,
        state: &TurnState,
    ) -> Result<Checkpoint, PersistenceError>;

    async fn load_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, PersistenceError>;

    /// 线程内全部检查点，按保存顺序
    async fn list(&self, thread_id: &str) -> Result<Vec<Checkpoint>, PersistenceError>;
}

pub struct SqliteCheckpointStore {
    db: Database,
}

impl SqliteCheckpointStore {
    pub fn open(db: Database) -> Result<Self, PersistenceError> {
        db.init(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                seq        INTEGER PRIMARY KEY AUTOINCREMENT,
                id         TEXT NOT NULL UNIQUE,
                thread_id  TEXT NOT NULL,
                parent_id  TEXT,
                version    INTEGER NOT NULL,
                next_step  TEXT NOT NULL,
                state      TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_checkpoints_thread ON checkpoints (thread_id, seq);",
        )?;
        Ok(Self { db })
    }
}

struct RawCheckpoint {
    id: String,
    thread_id: String,
    parent_id: Option<String>,
    version: u32,
    next_step: String,
    state: String,
    created_at: String,
}

impl RawCheckpoint {
    const COLUMNS: &'static str = "id, thread_id, parent_id, version, next_step, state, created_at";

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            thread_id: row.get(1)?,
            parent_id: row.get(2)?,
            version: row.get(3)?,
            next_step: row.get(4)?,
            state: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn decode(self) -> Result<Checkpoint, PersistenceError> {
        if self.version != CHECKPOINT_VERSION {
            return Err(PersistenceError::UnsupportedCheckpointVersion {
                found: self.version,
                expected: CHECKPOINT_VERSION,
            });
        }
        Ok(Checkpoint {
            next_step: Step::parse(&self.next_step)
                .ok_or_else(|| PersistenceError::Corrupt(format!("step {:?}", self.next_step)))?,
            state: serde_json::from_str(&self.state)?,
            created_at: decode_time(&self.created_at)?,
            id: self.id,
            thread_id: self.thread_id,
            parent_id: self.parent_id,
            version: self.version,
        })
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(
        &self,
        thread_id: &str,
        next_step: Step,
        state: &TurnState,
    ) -> Result<Checkpoint, PersistenceError> {
        let payload = serde_json::to_string(state)?;
        let mut checkpoint = Checkpoint {
            id: Uuid::new_v4().to_string(),
            thread_id: thread_id.to_string(),
            parent_id: None,
            version: CHECKPOINT_VERSION,
            next_step,
            state: state.clone(),
            created_at: Utc::now(),
        };
        let (id, thread, created_at) = (
            checkpoint.id.clone(),
            checkpoint.thread_id.clone(),
            encode_time(checkpoint.created_at),
        );
        let parent_id = self
            .db
            .run(move |conn| {
                let tx = conn.transaction()?;
                let parent: Option<String> = tx
                    .query_row(
                        "SELECT id FROM checkpoints WHERE thread_id = ?1 ORDER BY seq DESC LIMIT 1",
                        params![thread],
                        |row| row.get(0),
                    )
                    .optional()?;
                tx.execute(
                    "INSERT INTO checkpoints (id, thread_id, parent_id, version, next_step, state, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![id, thread, parent, CHECKPOINT_VERSION, next_step.as_str(), payload, created_at],
                )?;
                tx.commit()?;
                Ok(parent)
            })
            .await?;
        checkpoint.parent_id = parent_id;
        tracing::debug!(
            target: "sidekick::persistence",
            thread_id = %checkpoint.thread_id,
            checkpoint_id = %checkpoint.id,
            next_step = %next_step,
            "checkpoint saved"
        );
        Ok(checkpoint)
    }

    async fn load_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, PersistenceError> {
        let thread = thread_id.to_string();
        let raw = self
            .db
            .run(move |conn| {
                let sql = format!(
                    "SELECT {} FROM checkpoints WHERE thread_id = ?1 ORDER BY seq DESC LIMIT 1",
                    RawCheckpoint::COLUMNS
                );
                Ok(conn
                    .query_row(&sql, params![thread], RawCheckpoint::from_row)
                    .optional()?)
            })
            .await?;
        raw.map(RawCheckpoint::decode).transpose()
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<Checkpoint>, PersistenceError> {
        let thread = thread_id.to_string();
        let raws = self
            .db
            .run(move |conn| {
                let sql = format!(
                    "SELECT {} FROM checkpoints WHERE thread_id = ?1 ORDER BY seq ASC",
                    RawCheckpoint::COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![thread], RawCheckpoint::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        raws.into_iter().map(RawCheckpoint::decode).collect()
    }
}
