//! Worker：推进任务的一步
//!
//! 每次调用前重建系统提示词（当前时间、记忆片段、能力目录、成功标准、上一次被拒的反馈），
//! 替换线程中的 System 消息，然后请求推理客户端给出回答或能力调用。

use std::sync::Arc;

use chrono::{DateTime, Local};

use crate::core::{AgentError, TurnState};
use crate::llm::{Generation, ReasoningClient};
use crate::memory::Message;
use crate::tools::CapabilitySpec;

/// 构造 Worker 系统提示词所需的外部输入
pub struct WorkerContext<'a> {
    pub memory: &'a str,
    pub capabilities: &'a [CapabilitySpec],
    pub now: DateTime<Local>,
}

#[derive(Clone)]
pub struct Worker {
    reasoner: Arc<dyn ReasoningClient>,
}

impl Worker {
    pub fn new(reasoner: Arc<dyn ReasoningClient>) -> Self {
        Self { reasoner }
    }

    /// 执行一步：刷新系统提示词、调用模型、把产出追加到线程
    pub async fn step(
        &self,
        state: &mut TurnState,
        ctx: &WorkerContext<'_>,
    ) -> Result<Generation, AgentError> {
        state.set_system_message(build_system_prompt(state, ctx));
        let generation = self
            .reasoner
            .generate(&state.messages, ctx.capabilities)
            .await?;
        match &generation {
            Generation::Invocations(invocations) => {
                tracing::debug!(count = invocations.len(), "worker requested capabilities");
                state.push(Message::invocations(invocations.clone()));
            }
            Generation::Reply(text) => state.push(Message::assistant(text.clone())),
        }
        Ok(generation)
    }
}

pub fn build_system_prompt(state: &TurnState, ctx: &WorkerContext<'_>) -> String {
    let mut prompt = format!(
        "You are a helpful assistant that can use tools to complete tasks.\n\
         You keep working on a task until either you have a question or clarification for the user, \
         or the success criteria is met.\n\
         The current date and time is {}\n",
        ctx.now.format("%Y-%m-%d %H:%M:%S")
    );

    if !ctx.memory.is_empty() {
        prompt.push('\n');
        prompt.push_str(ctx.memory);
        prompt.push('\n');
    }

    if ctx.capabilities.is_empty() {
        prompt.push_str("\nYou have no tools available for this task.\n");
    } else {
        prompt.push_str("\nYou have the following tools available:\n");
        for capability in ctx.capabilities {
            prompt.push_str(&format!("- {}: {}\n", capability.name, capability.description));
        }
    }

    prompt.push_str(&format!(
        "\nThis is the success criteria:\n{}\n\
         You should reply either with a question for the user about this assignment, or with your final response.\n\
         If you have a question for the user, you need to reply by clearly stating your question. An example might be:\n\n\
         Question: please clarify whether you want a summary or a detailed answer\n\n\
         If you've finished, reply with the final answer, and don't ask a question; simply reply with the answer.\n",
        state.success_criteria
    ));

    if let Some(feedback) = &state.feedback_on_work {
        prompt.push_str(&format!(
            "\nPreviously you thought you completed the assignment, but your reply was rejected \
             because the success criteria was not met.\n\
             Here is the feedback on why this was rejected:\n{feedback}\n\
             With this feedback, please continue the assignment, ensuring that you meet the success \
             criteria or have a question for the user.\n"
        ));
    }

    prompt
}
