//! Evaluator：判断 Worker 的候选回答是否满足成功标准
//!
//! 把整段对话与成功标准交给推理客户端，要求返回结构化的 EvaluatorVerdict。
//! 返回不符合 schema 时整轮以 SchemaViolation 中止。

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::core::{AgentError, TurnState};
use crate::llm::{judge_as, ReasoningClient};
use crate::memory::{Message, Role};

/// Evaluator 的结构化判定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EvaluatorVerdict {
    /// Feedback on the assistant's response
    pub feedback: String,
    /// Whether the success criteria have been met
    pub success_criteria_met: bool,
    /// True if more input is needed from the user, or clarifications, or the assistant is stuck
    pub user_input_needed: bool,
}

const EVALUATOR_SYSTEM: &str = "You are an evaluator that determines if a task has been completed successfully by an Assistant.\n\
Assess the Assistant's last response based on the given criteria. Respond with your feedback, and with your decision \
on whether the success criteria has been met, and whether more input is needed from the user.";

#[derive(Clone)]
pub struct Evaluator {
    reasoner: Arc<dyn ReasoningClient>,
}

impl Evaluator {
    pub fn new(reasoner: Arc<dyn ReasoningClient>) -> Self {
        Self { reasoner }
    }

    pub async fn evaluate(&self, state: &TurnState) -> Result<EvaluatorVerdict, AgentError> {
        let messages = build_messages(state);
        let verdict: EvaluatorVerdict = judge_as(self.reasoner.as_ref(), &messages).await?;
        tracing::debug!(
            success_criteria_met = verdict.success_criteria_met,
            user_input_needed = verdict.user_input_needed,
            "evaluator verdict"
        );
        Ok(verdict)
    }
}

/// 对话转写：User / Assistant 两种行，能力请求显示为 [Tools use]，能力结果与系统提示词不出现
pub fn format_conversation(messages: &[Message]) -> String {
    let mut conversation = String::from("Conversation history:\n\n");
    for message in messages {
        match message.role {
            Role::User => conversation.push_str(&format!("User: {}\n", message.content)),
            Role::Assistant => {
                let text = if message.content.is_empty() { "[Tools use]" } else { &message.content };
                conversation.push_str(&format!("Assistant: {text}\n"));
            }
            Role::System | Role::Capability => {}
        }
    }
    conversation
}

pub fn build_messages(state: &TurnState) -> Vec<Message> {
    let last_response = state.candidate_reply().unwrap_or_default();
    let mut user = format!(
        "You are evaluating a conversation between the User and Assistant. You decide what action to take \
         based on the last response from the Assistant.\n\n\
         The entire conversation with the assistant, with the user's original request and all replies, is:\n\
         {}\n\
         The success criteria for this assignment is:\n{}\n\n\
         And the final response from the Assistant that you are evaluating is:\n{}\n\n\
         Respond with your feedback, and decide if the success criteria is met by this response.\n\
         Also, decide if more user input is required, either because the assistant has a question, \
         needs clarification, or seems to be stuck and unable to answer without help.\n\n\
         The Assistant has access to a tool to write files. If the Assistant says they have written a file, \
         then you can assume they have done so.\n\
         Overall you should give the Assistant the benefit of the doubt if they say they've done something. \
         But you should reject if you feel that more work should go into this.\n",
        format_conversation(&state.messages),
        state.success_criteria,
        last_response
    );
    if let Some(previous) = &state.feedback_on_work {
        user.push_str(&format!(
            "\nAlso, note that in a prior attempt from the Assistant, you provided this feedback: {previous}\n\
             If you're seeing the Assistant repeating the same mistakes, then consider responding that user input is required."
        ));
    }
    vec![Message::system(EVALUATOR_SYSTEM), Message::user(user)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::CapabilityInvocation;
    use serde_json::json;

    #[test]
    fn conversation_hides_system_and_capability_results() {
        let mut result = Message::user("file contents");
        result.role = Role::Capability;
        let messages = vec![
            Message::system("secret prompt"),
            Message::user("read it"),
            Message::invocations(vec![CapabilityInvocation::new("read_file", json!({}))]),
            result,
            Message::assistant("done"),
        ];
        let text = format_conversation(&messages);
        assert_eq!(
            text,
            "Conversation history:\n\nUser: read it\nAssistant: [Tools use]\nAssistant: done\n"
        );
    }

    #[test]
    fn prior_feedback_is_mentioned() {
        let mut state = TurnState::begin_turn(Vec::new(), "q", "criteria");
        state.push(Message::assistant("first try"));
        let fresh = build_messages(&state);
        assert!(!fresh[1].content.contains("prior attempt"));

        state.apply_verdict("too vague", false, false);
        state.push(Message::assistant("second try"));
        let again = build_messages(&state);
        assert!(again[1].content.contains("prior attempt from the Assistant, you provided this feedback: too vague"));
        assert!(again[1].content.contains("evaluating is:\nsecond try"));
    }
}
