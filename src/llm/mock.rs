//! 离线客户端（用于测试与无 API Key 的本地运行）
//!
//! - MockLlmClient：文本补全层面的假后端。judge 请求（系统提示词中带有目标 schema）返回一个合法对象，
//!   其余回显最后一条用户消息，便于本地跑通 Worker / Evaluator 流程。
//! - ScriptedReasoner：推理层面的脚本化后端，按队列回放预设的 generate / judge 结果并记录每次输入。

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::llm::{Generation, JudgeSchema, LlmClient, LlmError, ReasoningClient};
use crate::memory::{Message, Role};
use crate::tools::{CapabilityInvocation, CapabilitySpec};

/// 回显客户端
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let system = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        if system.contains("\"success_criteria_met\"") {
            return Ok(json!({
                "feedback": "Mock evaluator accepts the answer.",
                "success_criteria_met": true,
                "user_input_needed": false
            })
            .to_string());
        }
        if system.contains("\"facts\"") {
            return Ok(json!({ "facts": [] }).to_string());
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(format!("Echo from Mock: {last_user}"))
    }
}

/// 脚本化推理客户端
///
/// generate 依次消费 generations 队列；judge 按 schema 名消费对应队列。
/// 队列耗尽时 generate 返回 Request 错误，judge 返回 SchemaViolation。
#[derive(Default)]
pub struct ScriptedReasoner {
    generations: Mutex<VecDeque<Result<Generation, LlmError>>>,
    judgments: Mutex<HashMap<String, VecDeque<Result<Value, LlmError>>>>,
    generate_calls: Mutex<Vec<Vec<Message>>>,
    judge_calls: Mutex<Vec<(String, Vec<Message>)>>,
}

impl ScriptedReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_generation(self, generation: Result<Generation, LlmError>) -> Self {
        lock(&self.generations).push_back(generation);
        self
    }

    pub fn reply(self, text: &str) -> Self {
        self.push_generation(Ok(Generation::Reply(text.to_string())))
    }

    pub fn invoke(self, name: &str, arguments: Value) -> Self {
        self.push_generation(Ok(Generation::Invocations(vec![CapabilityInvocation::new(
            name, arguments,
        )])))
    }

    pub fn push_judgment(self, schema_name: &str, judgment: Result<Value, LlmError>) -> Self {
        lock(&self.judgments)
            .entry(schema_name.to_string())
            .or_default()
            .push_back(judgment);
        self
    }

    pub fn verdict(self, feedback: &str, success_criteria_met: bool, user_input_needed: bool) -> Self {
        self.push_judgment(
            "EvaluatorVerdict",
            Ok(json!({
                "feedback": feedback,
                "success_criteria_met": success_criteria_met,
                "user_input_needed": user_input_needed
            })),
        )
    }

    pub fn facts(self, facts: &[(&str, &str)]) -> Self {
        let facts: Vec<Value> = facts
            .iter()
            .map(|(k, v)| json!({ "key": k, "value": v }))
            .collect();
        self.push_judgment("ProfileUpdate", Ok(json!({ "facts": facts })))
    }

    /// 每次 generate 收到的消息（按调用顺序）
    pub fn generate_calls(&self) -> Vec<Vec<Message>> {
        lock(&self.generate_calls).clone()
    }

    /// 每次 judge 的 (schema 名, 消息)
    pub fn judge_calls(&self) -> Vec<(String, Vec<Message>)> {
        lock(&self.judge_calls).clone()
    }

    pub fn pending_generations(&self) -> usize {
        lock(&self.generations).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ReasoningClient for ScriptedReasoner {
    async fn generate(
        &self,
        messages: &[Message],
        _capabilities: &[CapabilitySpec],
    ) -> Result<Generation, LlmError> {
        lock(&self.generate_calls).push(messages.to_vec());
        lock(&self.generations)
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Request("script exhausted".to_string())))
    }

    async fn judge(&self, messages: &[Message], schema: &JudgeSchema) -> Result<Value, LlmError> {
        lock(&self.judge_calls).push((schema.name.clone(), messages.to_vec()));
        lock(&self.judgments)
            .get_mut(&schema.name)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| {
                Err(LlmError::SchemaViolation(format!(
                    "no scripted judgment for {}",
                    schema.name
                )))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::judge_as;
    use crate::react::EvaluatorVerdict;

    #[tokio::test]
    async fn mock_answers_judge_requests_with_valid_objects() {
        let llm = MockLlmClient;
        let schema = JudgeSchema::of::<EvaluatorVerdict>();
        let system = Message::system(format!("judge\n{}", schema.schema));
        let out = llm.complete(&[system, Message::user("hi")]).await.unwrap();
        let verdict: EvaluatorVerdict = serde_json::from_str(&out).unwrap();
        assert!(verdict.success_criteria_met);
    }

    #[tokio::test]
    async fn scripted_judgments_are_keyed_by_schema() {
        let reasoner = ScriptedReasoner::new().verdict("fine", true, false);
        let verdict: EvaluatorVerdict = judge_as(&reasoner, &[]).await.unwrap();
        assert_eq!(verdict.feedback, "fine");
        let again = judge_as::<EvaluatorVerdict>(&reasoner, &[]).await;
        assert!(matches!(again, Err(LlmError::SchemaViolation(_))));
        assert_eq!(reasoner.judge_calls().len(), 2);
    }
}
