//! 编排器：一个会话（线程）上的对话轮次
//!
//! run_turn 在后台任务中驱动控制循环，并通过 TurnStream 推送可见历史快照：
//! 1. 先推送「旧历史 + 用户消息」；
//! 2. 每次能力调用与结果发生时推送；
//! 3. 结束时依次推送最终回答、Evaluator 反馈（各一个快照），然后写终态检查点、对话记录，并在后台抽取画像。
//!
//! 每个会话同一时刻只允许一轮（run_turn 或 resume_turn），第二轮立即以 TurnInProgress 返回。
//!
//! 终态之后的持久化失败不会撤回已推送的回答，而是作为 TurnStream 的最终结果返回。

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{AgentError, CapabilityError, Step, TaskScheduler, TurnState};
use crate::llm::{create_deepseek_client, LlmClient, MockLlmClient, OpenAiClient};
use crate::memory::{CheckpointStore, MemoryAssembler, MemoryLimits, TranscriptStore};
use crate::react::events::SnapshotEmitter;
use crate::react::loop_::drive_turn;
use crate::react::{
    DisplayMessage, Evaluator, ProfileExtractor, TurnOutcome, TurnSession, TurnStream, Worker,
};
use crate::tools::CapabilityExecutor;

/// 编排器的可调参数（来自 [orchestrator] 与 [memory] 配置段）
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub default_success_criteria: String,
    pub max_evaluations: Option<usize>,
    pub result_preview_chars: usize,
    pub capability_timeout_secs: u64,
    pub memory: MemoryLimits,
    pub extractor_reply_chars: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl OrchestratorSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            default_success_criteria: cfg.orchestrator.default_success_criteria.clone(),
            max_evaluations: cfg.orchestrator.max_evaluations,
            result_preview_chars: cfg.orchestrator.result_preview_chars,
            capability_timeout_secs: cfg.capabilities.timeout_secs,
            memory: MemoryLimits {
                recent_pairs: cfg.memory.recent_pairs,
                entry_chars: cfg.memory.entry_chars,
            },
            extractor_reply_chars: cfg.memory.extractor_reply_chars,
        }
    }
}

/// 单个会话上的编排器；Clone 共享同一组协作者
#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) session_id: Arc<str>,
    pub(crate) worker: Worker,
    pub(crate) evaluator: Evaluator,
    pub(crate) extractor: ProfileExtractor,
    pub(crate) executor: Arc<CapabilityExecutor>,
    pub(crate) scheduler: Arc<TaskScheduler>,
    pub(crate) checkpoints: Arc<dyn CheckpointStore>,
    pub(crate) transcripts: Arc<dyn TranscriptStore>,
    pub(crate) memory: MemoryAssembler,
    pub(crate) settings: Arc<OrchestratorSettings>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) turn_gate: Arc<Mutex<()>>,
}

impl Orchestrator {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn capability_names(&self) -> Vec<String> {
        self.executor.names()
    }

    fn claim_turn(&self) -> Result<OwnedMutexGuard<()>, AgentError> {
        self.turn_gate
            .clone()
            .try_lock_owned()
            .map_err(|_| AgentError::TurnInProgress(self.session_id.to_string()))
    }

    /// 开始一轮：success_criteria 为空时使用默认标准；prior_history 为调用方当前显示的历史
    pub fn run_turn(
        &self,
        user_message: impl Into<String>,
        success_criteria: Option<&str>,
        prior_history: Vec<DisplayMessage>,
    ) -> TurnStream {
        let user_message = user_message.into();
        let criteria = success_criteria
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from)
            .unwrap_or_else(|| self.settings.default_success_criteria.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = self.shutdown.child_token();
        let claimed = self.claim_turn();
        let this = self.clone();
        let turn_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let _turn = match claimed {
                Ok(guard) => guard,
                Err(e) => {
                    tracing::warn!(target: "sidekick::turn", thread_id = %this.session_id, "turn rejected, another turn is running");
                    return Err(e);
                }
            };
            let mut emitter = SnapshotEmitter::new(prior_history, tx);
            emitter.push(DisplayMessage::user(user_message.clone()));
            emitter.emit();

            let history = this
                .checkpoints
                .load_latest(&this.session_id)
                .await?
                .map(|c| c.state.messages)
                .unwrap_or_default();
            let state = TurnState::begin_turn(history, &user_message, criteria);
            tracing::info!(
                target: "sidekick::turn",
                thread_id = %this.session_id,
                criteria = %state.success_criteria,
                "turn started"
            );
            this.drive(state, Step::Worker, &user_message, emitter, turn_cancel)
                .await
        });
        TurnStream::new(rx, handle, cancel)
    }

    /// 从最新检查点继续未完成的一轮；没有未完成的轮次时返回 None
    pub async fn resume_turn(
        &self,
        prior_history: Vec<DisplayMessage>,
    ) -> Result<Option<TurnStream>, AgentError> {
        let turn = self.claim_turn()?;
        let Some(checkpoint) = self.checkpoints.load_latest(&self.session_id).await? else {
            return Ok(None);
        };
        if checkpoint.next_step == Step::Terminal {
            return Ok(None);
        }
        let user_message = checkpoint
            .state
            .latest_user_message()
            .unwrap_or_default()
            .to_string();
        tracing::info!(
            target: "sidekick::turn",
            thread_id = %self.session_id,
            checkpoint_id = %checkpoint.id,
            next_step = %checkpoint.next_step,
            "resuming turn"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = self.shutdown.child_token();
        let this = self.clone();
        let turn_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let _turn = turn;
            let mut emitter = SnapshotEmitter::new(prior_history, tx);
            emitter.push(DisplayMessage::user(user_message.clone()));
            emitter.emit();
            this.drive(checkpoint.state, checkpoint.next_step, &user_message, emitter, turn_cancel)
                .await
        });
        Ok(Some(TurnStream::new(rx, handle, cancel)))
    }

    async fn drive(
        &self,
        state: TurnState,
        start: Step,
        user_message: &str,
        mut emitter: SnapshotEmitter,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, AgentError> {
        let session = TurnSession {
            thread_id: &self.session_id,
            worker: &self.worker,
            evaluator: &self.evaluator,
            executor: &self.executor,
            scheduler: &self.scheduler,
            checkpoints: self.checkpoints.as_ref(),
            memory: &self.memory,
            cancel,
            max_evaluations: self.settings.max_evaluations,
        };
        let state = match drive_turn(&session, state, start, &mut emitter).await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(
                    target: "sidekick::turn",
                    thread_id = %self.session_id,
                    error = %e,
                    "turn aborted"
                );
                return Err(e);
            }
        };
        self.complete_turn(state, user_message, emitter).await
    }

    /// 推送最终回答与反馈，然后持久化
    async fn complete_turn(
        &self,
        state: TurnState,
        user_message: &str,
        mut emitter: SnapshotEmitter,
    ) -> Result<TurnOutcome, AgentError> {
        let reply = state
            .candidate_reply()
            .filter(|r| !r.is_empty())
            .map(String::from);
        let feedback = state.feedback_on_work.clone();
        if let Some(reply) = &reply {
            emitter.push(DisplayMessage::assistant(reply.clone()));
            emitter.emit();
        }
        if let Some(feedback) = &feedback {
            emitter.push(DisplayMessage::assistant(format!(
                "Evaluator Feedback on this answer: {feedback}"
            )));
            emitter.emit();
        }

        let checkpoint = self
            .checkpoints
            .save(&self.session_id, Step::Terminal, &state)
            .await;
        if let Err(e) = &checkpoint {
            tracing::error!(target: "sidekick::persistence", thread_id = %self.session_id, error = %e, "terminal checkpoint failed");
        }

        let transcript = match &reply {
            Some(reply) => {
                let appended = self
                    .transcripts
                    .append(&self.session_id, user_message, reply)
                    .await;
                match &appended {
                    Ok(()) => self.extractor.spawn(
                        &self.scheduler,
                        user_message.to_string(),
                        reply.clone(),
                    ),
                    Err(e) => tracing::error!(target: "sidekick::persistence", thread_id = %self.session_id, error = %e, "transcript append failed"),
                }
                appended
            }
            None => Ok(()),
        };

        tracing::info!(
            target: "sidekick::turn",
            thread_id = %self.session_id,
            success_criteria_met = state.success_criteria_met,
            user_input_needed = state.user_input_needed,
            evaluations = state.evaluations,
            "turn finished"
        );

        checkpoint?;
        transcript?;
        Ok(TurnOutcome {
            session_id: self.session_id.to_string(),
            reply,
            feedback,
            success_criteria_met: state.success_criteria_met,
            user_input_needed: state.user_input_needed,
            history: emitter.snapshot(),
        })
    }

    /// 取消所有进行中的轮次并释放能力资源；重复调用安全，资源只释放一次
    pub async fn release(&self) -> Result<(), CapabilityError> {
        self.shutdown.cancel();
        let result = self.executor.release().await;
        match &result {
            Ok(()) => tracing::debug!(thread_id = %self.session_id, "capabilities released"),
            Err(e) => tracing::warn!(thread_id = %self.session_id, error = %e, "capability release failed"),
        }
        result
    }

    pub fn is_released(&self) -> bool {
        self.executor.is_released()
    }
}

/// 根据配置与环境变量选择 LLM 后端（DeepSeek / OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let has_deepseek_key = std::env::var("DEEPSEEK_API_KEY").is_ok();
    let has_openai_key = std::env::var("OPENAI_API_KEY").is_ok();

    match provider.as_str() {
        "deepseek" if has_deepseek_key || has_openai_key => {
            tracing::info!("Using DeepSeek LLM ({})", cfg.llm.model);
            Arc::new(create_deepseek_client(
                Some(&cfg.llm.model),
                cfg.llm.base_url.as_deref(),
            ))
        }
        "openai" if has_openai_key => {
            tracing::info!("Using OpenAI LLM ({})", cfg.llm.model);
            Arc::new(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                std::env::var("OPENAI_API_KEY").ok().as_deref(),
            ))
        }
        "mock" => Arc::new(MockLlmClient),
        other => {
            tracing::warn!(provider = %other, "No API key set or provider unknown, using Mock LLM");
            Arc::new(MockLlmClient)
        }
    }
}
