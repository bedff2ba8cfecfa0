//! 轮次状态与步骤状态机
//!
//! TurnState 是一轮对话在 Worker / Dispatch / Evaluator 之间传递的全部状态，可整体序列化进检查点。
//! Step::next 是唯一的路由表：给定当前步骤和该步骤的产出，得到下一步骤。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::memory::{Message, Role};
use crate::tools::CapabilityInvocation;

/// 一轮对话的状态
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnState {
    /// 线程化消息，只追加（System 消息除外，见 set_system_message）
    pub messages: Vec<Message>,
    pub success_criteria: String,
    /// 最近一次 Evaluator 反馈；新一轮开始时清空
    pub feedback_on_work: Option<String>,
    pub success_criteria_met: bool,
    pub user_input_needed: bool,
    /// 本轮已完成的评估次数
    #[serde(default)]
    pub evaluations: usize,
}

impl TurnState {
    pub fn new(success_criteria: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            success_criteria: success_criteria.into(),
            feedback_on_work: None,
            success_criteria_met: false,
            user_input_needed: false,
            evaluations: 0,
        }
    }

    /// 在既有线程上开始新一轮：保留历史消息，追加用户消息，重置评估相关字段
    pub fn begin_turn(
        history: Vec<Message>,
        user_message: &str,
        success_criteria: impl Into<String>,
    ) -> Self {
        let mut state = Self::new(success_criteria);
        state.messages = history;
        state.push(Message::user(user_message));
        state
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// 替换系统提示词；保证线程中恰好一条 System 消息且位于首位
    pub fn set_system_message(&mut self, content: impl Into<String>) {
        self.messages.retain(|m| m.role != Role::System);
        self.messages.insert(0, Message::system(content));
    }

    pub fn is_terminal(&self) -> bool {
        self.success_criteria_met || self.user_input_needed
    }

    /// 记录一次评估结果
    pub fn apply_verdict(&mut self, feedback: &str, success_criteria_met: bool, user_input_needed: bool) {
        self.feedback_on_work = Some(feedback.to_string());
        self.success_criteria_met = success_criteria_met;
        self.user_input_needed = user_input_needed;
        self.evaluations += 1;
        self.push(Message::evaluator_feedback(feedback));
    }

    /// 最后一条消息若是能力请求，返回其调用列表
    pub fn pending_invocations(&self) -> &[CapabilityInvocation] {
        match self.messages.last() {
            Some(m) if m.requests_capabilities() => &m.invocations,
            _ => &[],
        }
    }

    /// 最近一条 Worker 候选回答
    pub fn candidate_reply(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.is_candidate_reply())
            .map(|m| m.content.as_str())
    }

    pub fn latest_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// 控制循环的步骤
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Worker,
    Dispatch,
    Evaluator,
    Terminal,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::Worker => "worker",
            Step::Dispatch => "dispatch",
            Step::Evaluator => "evaluator",
            Step::Terminal => "terminal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "worker" => Some(Step::Worker),
            "dispatch" => Some(Step::Dispatch),
            "evaluator" => Some(Step::Evaluator),
            "terminal" => Some(Step::Terminal),
            _ => None,
        }
    }

    /// 路由表；None 表示该步骤不可能产生这种转移
    pub fn next(self, transition: Transition) -> Option<Step> {
        match (self, transition) {
            (Step::Worker, Transition::CapabilitiesRequested) => Some(Step::Dispatch),
            (Step::Worker, Transition::CandidateReply) => Some(Step::Evaluator),
            (Step::Dispatch, Transition::DispatchCompleted) => Some(Step::Worker),
            (
                Step::Evaluator,
                Transition::Judged {
                    success_criteria_met,
                    user_input_needed,
                },
            ) => {
                if success_criteria_met || user_input_needed {
                    Some(Step::Terminal)
                } else {
                    Some(Step::Worker)
                }
            }
            _ => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 步骤产出
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Worker 请求调用能力
    CapabilitiesRequested,
    /// Worker 给出候选回答
    CandidateReply,
    DispatchCompleted,
    Judged {
        success_criteria_met: bool,
        user_input_needed: bool,
    },
}
