//! Agent 构建器：统一的初始化逻辑
//!
//! AgentBuilder 持有跨会话共享的协作者（推理客户端、三个存储、调度器），
//! 每次 build_orchestrator 都用能力工厂创建一套新的能力实例，因此旧会话的资源释放不会影响新会话。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{create_llm_from_config, AgentError, Orchestrator, OrchestratorSettings, TaskScheduler};
use crate::llm::{JsonProtocolReasoner, ReasoningClient};
use crate::memory::{
    CheckpointStore, Database, MemoryAssembler, ProfileStore, SessionStore, SqliteCheckpointStore,
    SqliteProfileStore, SqliteTranscriptStore, TranscriptStore,
};
use crate::react::{Evaluator, ProfileExtractor, Worker};
use crate::tools::{
    CapabilityExecutor, CapabilityRegistry, FetchPageTool, ListDirectoryTool, PushNotificationTool,
    ReadFileTool, WriteFileTool,
};
#[cfg(feature = "browser")]
use crate::tools::BrowserTool;

/// 为每个编排器创建一套新的能力
pub type CapabilityFactory = Arc<dyn Fn() -> CapabilityRegistry + Send + Sync>;

/// Agent 构建器
#[derive(Clone)]
pub struct AgentBuilder {
    settings: Arc<OrchestratorSettings>,
    reasoner: Arc<dyn ReasoningClient>,
    profile: Arc<dyn ProfileStore>,
    transcripts: Arc<dyn TranscriptStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    scheduler: Arc<TaskScheduler>,
    capabilities: CapabilityFactory,
}

impl AgentBuilder {
    pub fn new(
        reasoner: Arc<dyn ReasoningClient>,
        profile: Arc<dyn ProfileStore>,
        transcripts: Arc<dyn TranscriptStore>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            settings: Arc::new(OrchestratorSettings::default()),
            reasoner,
            profile,
            transcripts,
            checkpoints,
            scheduler: Arc::new(TaskScheduler::default()),
            capabilities: Arc::new(CapabilityRegistry::new),
        }
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = Arc::new(settings);
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<TaskScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_capabilities<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> CapabilityRegistry + Send + Sync + 'static,
    {
        self.capabilities = Arc::new(factory);
        self
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn transcripts(&self) -> &Arc<dyn TranscriptStore> {
        &self.transcripts
    }

    pub fn profile(&self) -> &Arc<dyn ProfileStore> {
        &self.profile
    }

    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    /// 为指定会话构建编排器（带一套新的能力实例）
    pub fn build_orchestrator(&self, session_id: &str) -> Orchestrator {
        let executor = CapabilityExecutor::new(
            (self.capabilities)(),
            Duration::from_secs(self.settings.capability_timeout_secs),
            self.settings.result_preview_chars,
        );
        Orchestrator {
            session_id: Arc::from(session_id),
            worker: Worker::new(self.reasoner.clone()),
            evaluator: Evaluator::new(self.reasoner.clone()),
            extractor: ProfileExtractor::new(
                self.reasoner.clone(),
                self.profile.clone(),
                self.settings.extractor_reply_chars,
            ),
            executor: Arc::new(executor),
            scheduler: self.scheduler.clone(),
            checkpoints: self.checkpoints.clone(),
            transcripts: self.transcripts.clone(),
            memory: MemoryAssembler::new(
                self.profile.clone(),
                self.transcripts.clone(),
                self.settings.memory.clone(),
            ),
            settings: self.settings.clone(),
            shutdown: CancellationToken::new(),
            turn_gate: Arc::new(Mutex::new(())),
        }
    }
}

/// 按配置注册能力：沙箱文件读写、网页抓取、可选推送与浏览器
pub fn build_capability_registry(cfg: &AppConfig, sandbox: &Path) -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    registry.register(ReadFileTool::new(sandbox));
    registry.register(WriteFileTool::new(sandbox));
    registry.register(ListDirectoryTool::new(sandbox));
    registry.register(FetchPageTool::new(
        cfg.capabilities.fetch.allowed_domains.clone(),
        cfg.capabilities.fetch.timeout_secs,
        cfg.capabilities.fetch.max_result_chars,
    ));

    if cfg.capabilities.notify.enabled {
        match PushNotificationTool::from_env() {
            Some(tool) => registry.register(tool),
            None => tracing::warn!("push notifications enabled but PUSHOVER_TOKEN / PUSHOVER_USER not set"),
        }
    }

    #[cfg(feature = "browser")]
    registry.register(BrowserTool::new(
        cfg.capabilities.fetch.allowed_domains.clone(),
        cfg.capabilities.fetch.max_result_chars,
    ));

    registry
}

/// 按配置组装：打开 SQLite 存储、选择 LLM 后端、准备沙箱目录
pub fn create_agent_builder(cfg: &AppConfig) -> Result<(AgentBuilder, SessionStore), AgentError> {
    let data_dir = cfg.app.data_dir();
    std::fs::create_dir_all(&data_dir)
        .map_err(|e| AgentError::Config(format!("data_dir {}: {e}", data_dir.display())))?;
    let sandbox = cfg.app.sandbox_root();
    std::fs::create_dir_all(&sandbox)
        .map_err(|e| AgentError::Config(format!("sandbox_root {}: {e}", sandbox.display())))?;
    let sandbox = sandbox.canonicalize().unwrap_or(sandbox);

    let main_db = Database::new(data_dir.join("sidekick.db"));
    let sessions = SessionStore::open(main_db.clone())?;
    let profile = Arc::new(SqliteProfileStore::open(main_db.clone())?);
    let transcripts = Arc::new(SqliteTranscriptStore::open(main_db)?);
    let checkpoints = Arc::new(SqliteCheckpointStore::open(Database::new(
        data_dir.join("checkpoints.db"),
    ))?);

    let llm = create_llm_from_config(cfg);
    let reasoner = Arc::new(JsonProtocolReasoner::new(
        llm,
        Duration::from_secs(cfg.llm.timeouts.request),
    ));

    let capability_cfg = cfg.clone();
    let builder = AgentBuilder::new(reasoner, profile, transcripts, checkpoints)
        .with_settings(OrchestratorSettings::from_config(cfg))
        .with_scheduler(Arc::new(TaskScheduler::new(
            cfg.orchestrator.max_concurrent_capabilities,
        )))
        .with_capabilities(move || build_capability_registry(&capability_cfg, &sandbox));

    tracing::info!(data_dir = %data_dir.display(), "agent builder ready");
    Ok((builder, sessions))
}
