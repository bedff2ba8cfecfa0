//! 记忆层：线程化消息、SQLite 存储（会话、对话记录、画像、检查点）与记忆上下文组装

pub mod assembler;
pub mod checkpoint;
pub mod conversation;
pub mod db;
pub mod profile;
pub mod sessions;
pub mod transcript;

pub use assembler::{render_memory, MemoryAssembler, MemoryLimits};
pub use checkpoint::{Checkpoint, CheckpointStore, SqliteCheckpointStore, CHECKPOINT_VERSION};
pub use conversation::{preview, truncate_chars, Message, Role, EVALUATOR_NAME};
pub use db::Database;
pub use profile::{ProfileFact, ProfileStore, SqliteProfileStore};
pub use sessions::{default_session_name, Session, SessionStore, DEFAULT_SESSION_NAME};
pub use transcript::{SqliteTranscriptStore, TranscriptEntry, TranscriptStore};
