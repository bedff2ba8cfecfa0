//! 会话监管：活动会话的生命周期
//!
//! 同一时刻只有一个活动会话及其编排器。切换、新建、重置时先换上新编排器，
//! 旧编排器的能力资源在后台释放，释放失败只记 warn，不影响新会话。

use crate::core::{AgentBuilder, AgentError, Orchestrator};
use crate::memory::{Session, SessionStore};
use crate::react::DisplayMessage;

/// 当前活动会话
pub struct ActiveSession {
    pub session: Session,
    pub orchestrator: Orchestrator,
}

pub struct SessionSupervisor {
    builder: AgentBuilder,
    sessions: SessionStore,
    active: Option<ActiveSession>,
}

impl SessionSupervisor {
    pub fn new(builder: AgentBuilder, sessions: SessionStore) -> Self {
        Self {
            builder,
            sessions,
            active: None,
        }
    }

    pub fn builder(&self) -> &AgentBuilder {
        &self.builder
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn active(&self) -> Option<&ActiveSession> {
        self.active.as_ref()
    }

    /// 启动：激活最新会话（没有则创建 Default Session）
    pub async fn start(&mut self) -> Result<&ActiveSession, AgentError> {
        let session = self.sessions.get_or_create_latest().await?;
        Ok(self.activate(session))
    }

    pub async fn switch_to(&mut self, session_id: &str) -> Result<&ActiveSession, AgentError> {
        let session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))?;
        Ok(self.activate(session))
    }

    pub async fn create(&mut self, name: Option<&str>) -> Result<&ActiveSession, AgentError> {
        let session = self.sessions.create(name).await?;
        Ok(self.activate(session))
    }

    /// 保留会话与历史，只换一个新的编排器（新的能力实例）
    pub async fn reset(&mut self) -> Result<&ActiveSession, AgentError> {
        let session = match &self.active {
            Some(active) => active.session.clone(),
            None => self.sessions.get_or_create_latest().await?,
        };
        Ok(self.activate(session))
    }

    /// 重命名活动会话；名称为空白时不修改
    pub async fn rename(&mut self, name: &str) -> Result<bool, AgentError> {
        let Some(active) = self.active.as_mut() else {
            return Ok(false);
        };
        let renamed = self.sessions.rename(&active.session.id, name).await?;
        if renamed {
            active.session.name = name.trim().to_string();
        }
        Ok(renamed)
    }

    pub async fn list(&self) -> Result<Vec<Session>, AgentError> {
        Ok(self.sessions.list().await?)
    }

    /// 活动会话的可见历史（来自对话记录）
    pub async fn history(&self) -> Result<Vec<DisplayMessage>, AgentError> {
        let Some(active) = &self.active else {
            return Ok(Vec::new());
        };
        let entries = self.builder.transcripts().all(&active.session.id).await?;
        Ok(entries.iter().map(DisplayMessage::from_transcript).collect())
    }

    /// 释放活动编排器并等待所有后台任务（画像抽取、资源释放）结束
    pub async fn shutdown(&mut self) {
        if let Some(active) = self.active.take() {
            if let Err(e) = active.orchestrator.release().await {
                tracing::warn!(session_id = %active.session.id, error = %e, "release on shutdown failed");
            }
        }
        self.builder.scheduler().wait_background().await;
    }

    fn activate(&mut self, session: Session) -> &ActiveSession {
        let orchestrator = self.builder.build_orchestrator(&session.id);
        tracing::info!(session_id = %session.id, name = %session.name, "session activated");
        if let Some(previous) = self.active.take() {
            self.release_in_background(previous);
        }
        self.active.insert(ActiveSession {
            session,
            orchestrator,
        })
    }

    fn release_in_background(&self, previous: ActiveSession) {
        let session_id = previous.session.id;
        let orchestrator = previous.orchestrator;
        self.builder
            .scheduler()
            .spawn_background("release_capabilities", async move {
                orchestrator.release().await.map_err(|e| format!("session {session_id}: {e}"))
            });
    }
}
