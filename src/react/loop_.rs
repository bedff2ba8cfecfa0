//! 控制循环：Worker -> (Dispatch -> Worker)* -> Evaluator -> Worker | Terminal
//!
//! 每一步结束后按 Step::next 路由，并在进入下一步前保存检查点；检查点写入失败会中止本轮。
//! 到达 Terminal 时循环返回，由调用方推送最终回答并完成持久化。
//! 可选 max_evaluations：评估次数达到上限仍未通过时强制 user_input_needed，防止无限循环。

use chrono::Local;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, Step, TaskScheduler, Transition, TurnState};
use crate::llm::Generation;
use crate::memory::{CheckpointStore, MemoryAssembler, Message};
use crate::react::events::SnapshotEmitter;
use crate::react::{DisplayMessage, Evaluator, Worker, WorkerContext};
use crate::tools::{CapabilityExecutor, CapabilityResult};

/// 驱动一轮所需的全部协作者
pub struct TurnSession<'a> {
    /// 线程 id（会话 id）
    pub thread_id: &'a str,
    pub worker: &'a Worker,
    pub evaluator: &'a Evaluator,
    pub executor: &'a CapabilityExecutor,
    pub scheduler: &'a TaskScheduler,
    pub checkpoints: &'a dyn CheckpointStore,
    pub memory: &'a MemoryAssembler,
    pub cancel: CancellationToken,
    /// None 表示不限
    pub max_evaluations: Option<usize>,
}

/// 从 start 开始推进，直到路由到 Terminal；返回终态
pub(crate) async fn drive_turn(
    session: &TurnSession<'_>,
    mut state: TurnState,
    start: Step,
    emitter: &mut SnapshotEmitter,
) -> Result<TurnState, AgentError> {
    let mut step = start;
    while step != Step::Terminal {
        if session.cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        let transition = tokio::select! {
            biased;
            _ = session.cancel.cancelled() => return Err(AgentError::Cancelled),
            t = run_step(session, step, &mut state, emitter) => t?,
        };
        let next = step.next(transition).ok_or_else(|| AgentError::InvalidTransition {
            from: step.to_string(),
            transition: format!("{transition:?}"),
        })?;
        tracing::debug!(
            target: "sidekick::turn",
            thread_id = %session.thread_id,
            from = %step,
            to = %next,
            "step"
        );
        if next != Step::Terminal {
            session.checkpoints.save(session.thread_id, next, &state).await?;
        }
        step = next;
    }
    Ok(state)
}

async fn run_step(
    session: &TurnSession<'_>,
    step: Step,
    state: &mut TurnState,
    emitter: &mut SnapshotEmitter,
) -> Result<Transition, AgentError> {
    match step {
        Step::Worker => {
            let memory = session.memory.assemble(session.thread_id).await?;
            let capabilities = session.executor.catalogue();
            let ctx = WorkerContext {
                memory: &memory,
                capabilities: &capabilities,
                now: Local::now(),
            };
            match session.worker.step(state, &ctx).await? {
                Generation::Invocations(invocations) => {
                    emitter.extend(invocations.iter().map(DisplayMessage::invocation));
                    emitter.emit();
                    Ok(Transition::CapabilitiesRequested)
                }
                Generation::Reply(_) => Ok(Transition::CandidateReply),
            }
        }
        Step::Dispatch => {
            let results = dispatch(session, state).await;
            emitter.extend(results.iter().map(DisplayMessage::capability_result));
            emitter.emit();
            Ok(Transition::DispatchCompleted)
        }
        Step::Evaluator => {
            let verdict = session.evaluator.evaluate(state).await?;
            state.apply_verdict(
                &verdict.feedback,
                verdict.success_criteria_met,
                verdict.user_input_needed,
            );
            if let Some(max) = session.max_evaluations {
                if !state.is_terminal() && state.evaluations >= max {
                    tracing::warn!(
                        target: "sidekick::turn",
                        thread_id = %session.thread_id,
                        evaluations = state.evaluations,
                        "evaluation limit reached, asking the user for input"
                    );
                    state.user_input_needed = true;
                }
            }
            Ok(Transition::Judged {
                success_criteria_met: state.success_criteria_met,
                user_input_needed: state.user_input_needed,
            })
        }
        Step::Terminal => Err(AgentError::InvalidTransition {
            from: step.to_string(),
            transition: "run".to_string(),
        }),
    }
}

/// 执行最后一条 assistant 消息请求的全部调用，结果按调用顺序追加到线程
async fn dispatch(session: &TurnSession<'_>, state: &mut TurnState) -> Vec<CapabilityResult> {
    let pending = state.pending_invocations().to_vec();
    let results = session.executor.invoke_batch(&pending, session.scheduler).await;
    for result in &results {
        state.push(Message::capability_result(result));
    }
    results
}
