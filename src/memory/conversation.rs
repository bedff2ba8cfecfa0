//! 线程化对话消息
//!
//! 一轮中 Worker / Dispatch / Evaluator 只向 TurnState.messages 追加 Message；
//! 唯一的例外是 System 消息，每次 Worker 步骤都会被替换为最新的系统提示词。

use serde::{Deserialize, Serialize};

use crate::tools::{CapabilityInvocation, CapabilityResult};

/// Evaluator 反馈消息的 name 标记，用来和 Worker 的候选回答区分
pub const EVALUATOR_NAME: &str = "evaluator";

/// 消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    /// 能力调用的结果，回填给 Worker
    Capability,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Capability => "capability",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "capability" => Some(Role::Capability),
            _ => None,
        }
    }
}

/// 单条消息
///
/// - Assistant 消息可以携带 invocations（请求调用能力），此时 content 通常为空；
/// - Capability 消息以 invocation_id 对应到发起它的调用，name 为能力名。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invocations: Vec<CapabilityInvocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            invocations: Vec::new(),
            invocation_id: None,
            name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Worker 请求调用一个或多个能力
    pub fn invocations(invocations: Vec<CapabilityInvocation>) -> Self {
        Self {
            invocations,
            ..Self::with_role(Role::Assistant, "")
        }
    }

    /// 能力调用结果（完整内容，不截断）
    pub fn capability_result(result: &CapabilityResult) -> Self {
        Self {
            invocation_id: Some(result.invocation_id.clone()),
            name: Some(result.name.clone()),
            ..Self::with_role(Role::Capability, result.content.clone())
        }
    }

    /// Evaluator 的反馈，以 assistant 身份追加
    pub fn evaluator_feedback(feedback: &str) -> Self {
        Self {
            name: Some(EVALUATOR_NAME.to_string()),
            ..Self::with_role(
                Role::Assistant,
                format!("Evaluator Feedback on this answer: {feedback}"),
            )
        }
    }

    pub fn requests_capabilities(&self) -> bool {
        self.role == Role::Assistant && !self.invocations.is_empty()
    }

    pub fn is_evaluator_feedback(&self) -> bool {
        self.role == Role::Assistant && self.name.as_deref() == Some(EVALUATOR_NAME)
    }

    /// Worker 给出的候选回答（非能力请求、非 Evaluator 反馈的 assistant 消息）
    pub fn is_candidate_reply(&self) -> bool {
        self.role == Role::Assistant && self.invocations.is_empty() && !self.is_evaluator_feedback()
    }
}

/// 按字符截取前 limit 个字符；返回 (截取结果, 是否发生截断)
pub fn truncate_chars(text: &str, limit: usize) -> (String, bool) {
    match text.char_indices().nth(limit) {
        Some((byte_idx, _)) => (text[..byte_idx].to_string(), true),
        None => (text.to_string(), false),
    }
}

/// 展示用预览：超过 limit 时截断并追加 "..."
pub fn preview(text: &str, limit: usize) -> String {
    match truncate_chars(text, limit) {
        (head, true) => format!("{head}..."),
        (whole, false) => whole,
    }
}
