//! 集成测试公共工具：临时目录中的 SQLite 存储、脚本化推理客户端、测试能力
#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;

use sidekick::core::{AgentBuilder, CapabilityError, OrchestratorSettings};
use sidekick::llm::ReasoningClient;
use sidekick::memory::{
    Database, SessionStore, SqliteCheckpointStore, SqliteProfileStore, SqliteTranscriptStore,
};
use sidekick::tools::{Capability, CapabilityRegistry};

/// 在 dir 下打开（或重新打开）全部存储并组装构建器
pub fn open_builder(dir: &Path, reasoner: Arc<dyn ReasoningClient>) -> (AgentBuilder, SessionStore) {
    let main_db = Database::new(dir.join("sidekick.db"));
    let sessions = SessionStore::open(main_db.clone()).unwrap();
    let profile = Arc::new(SqliteProfileStore::open(main_db.clone()).unwrap());
    let transcripts = Arc::new(SqliteTranscriptStore::open(main_db).unwrap());
    let checkpoints =
        Arc::new(SqliteCheckpointStore::open(Database::new(dir.join("checkpoints.db"))).unwrap());
    let builder = AgentBuilder::new(reasoner, profile, transcripts, checkpoints)
        .with_capabilities(test_registry);
    (builder, sessions)
}

pub struct Harness {
    pub dir: TempDir,
    pub builder: AgentBuilder,
    pub sessions: SessionStore,
}

pub fn harness(reasoner: Arc<dyn ReasoningClient>) -> Harness {
    let dir = TempDir::new().unwrap();
    let (builder, sessions) = open_builder(dir.path(), reasoner);
    Harness {
        dir,
        builder,
        sessions,
    }
}

pub fn settings_with_max_evaluations(max: usize) -> OrchestratorSettings {
    OrchestratorSettings {
        max_evaluations: Some(max),
        ..OrchestratorSettings::default()
    }
}

/// echo + slow
pub fn test_registry() -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    registry.register(EchoCapability);
    registry.register(SlowCapability(Duration::from_secs(30)));
    registry
}

/// 原样返回 text 参数
pub struct EchoCapability;

#[async_trait]
impl Capability for EchoCapability {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the text argument"
    }

    async fn invoke(&self, args: Value) -> Result<String, CapabilityError> {
        Ok(args.get("text").and_then(|v| v.as_str()).unwrap_or("").to_string())
    }
}

/// 长时间不返回，用于取消测试
pub struct SlowCapability(pub Duration);

#[async_trait]
impl Capability for SlowCapability {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "Sleep for a long time"
    }

    async fn invoke(&self, _args: Value) -> Result<String, CapabilityError> {
        tokio::time::sleep(self.0).await;
        Ok("woke up".to_string())
    }
}

/// 模拟持有外部资源（如浏览器）的能力：记录 release 次数，可配置为释放失败
pub struct ResourceCapability {
    pub releases: Arc<AtomicUsize>,
    pub fail_release: bool,
}

#[async_trait]
impl Capability for ResourceCapability {
    fn name(&self) -> &str {
        "resource"
    }

    fn description(&self) -> &str {
        "Hold an open resource"
    }

    async fn invoke(&self, _args: Value) -> Result<String, CapabilityError> {
        Ok("resource opened".to_string())
    }

    async fn release(&self) -> Result<(), CapabilityError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        if self.fail_release {
            Err(CapabilityError::Release("handle already gone".to_string()))
        } else {
            Ok(())
        }
    }
}
