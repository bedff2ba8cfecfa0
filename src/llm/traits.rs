//! LLM 客户端抽象
//!
//! 两层：
//! - LlmClient：纯文本补全（OpenAI 兼容 / DeepSeek / Mock），只关心 messages -> 文本；
//! - ReasoningClient：控制循环使用的接口，generate 返回「候选回答或能力调用」，
//!   judge 返回符合给定 JSON Schema 的结构化对象。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::memory::Message;
use crate::tools::{CapabilityInvocation, CapabilitySpec};

/// 文本补全客户端
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;

    /// 累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 推理客户端错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// 结构化输出不符合要求的 schema
    #[error("{0}")]
    SchemaViolation(String),
}

/// generate 的结果：候选回答，或一组能力调用
#[derive(Debug, Clone, PartialEq)]
pub enum Generation {
    Reply(String),
    Invocations(Vec<CapabilityInvocation>),
}

/// judge 所需的结构化输出描述
#[derive(Debug, Clone)]
pub struct JudgeSchema {
    pub name: String,
    pub schema: Value,
}

impl JudgeSchema {
    pub fn of<T: JsonSchema>() -> Self {
        let root = schemars::schema_for!(T);
        Self {
            name: T::schema_name(),
            schema: serde_json::to_value(root).unwrap_or(Value::Null),
        }
    }
}

/// 控制循环依赖的推理接口
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    /// 生成下一步：回答文本或能力调用（capabilities 为可用能力目录）
    async fn generate(
        &self,
        messages: &[Message],
        capabilities: &[CapabilitySpec],
    ) -> Result<Generation, LlmError>;

    /// 生成符合 schema 的 JSON 对象
    async fn judge(&self, messages: &[Message], schema: &JudgeSchema) -> Result<Value, LlmError>;
}

/// judge 并反序列化为具体类型；不匹配时返回 SchemaViolation
pub async fn judge_as<T>(client: &dyn ReasoningClient, messages: &[Message]) -> Result<T, LlmError>
where
    T: DeserializeOwned + JsonSchema,
{
    let schema = JudgeSchema::of::<T>();
    let value = client.judge(messages, &schema).await?;
    serde_json::from_value(value)
        .map_err(|e| LlmError::SchemaViolation(format!("{} does not match schema: {e}", schema.name)))
}
