//! 基于文本补全的 ReasoningClient 实现
//!
//! 任意 LlmClient 都只能返回文本，这里用 JSON 约定补上两种结构化能力：
//! - generate：系统提示词附上能力目录与调用格式，模型输出 `{"calls": [...]}` 即视为能力调用；
//! - judge：系统提示词附上目标 JSON Schema，从回复中提取 JSON 对象。
//!
//! 能力调用与结果在发给 LlmClient 前被渲染为普通 assistant / user 文本。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::llm::{Generation, JudgeSchema, LlmClient, LlmError, ReasoningClient};
use crate::memory::{Message, Role};
use crate::tools::{invocation_schema_json, CapabilityInvocation, CapabilitySpec};

/// JSON 约定推理客户端：包装 LlmClient 并施加请求超时
pub struct JsonProtocolReasoner {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
}

impl JsonProtocolReasoner {
    pub fn new(llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        match tokio::time::timeout(self.timeout, self.llm.complete(messages)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(LlmError::Request(e)),
            Err(_) => Err(LlmError::Timeout(self.timeout.as_secs())),
        }
    }
}

#[async_trait]
impl ReasoningClient for JsonProtocolReasoner {
    async fn generate(
        &self,
        messages: &[Message],
        capabilities: &[CapabilitySpec],
    ) -> Result<Generation, LlmError> {
        let section = if capabilities.is_empty() {
            String::new()
        } else {
            invocation_protocol_section(capabilities)
        };
        let transport = with_system_section(render_for_transport(messages), &section);
        let output = self.complete(&transport).await?;
        Ok(parse_generation(&output))
    }

    async fn judge(&self, messages: &[Message], schema: &JudgeSchema) -> Result<Value, LlmError> {
        let section = format!(
            "Respond with only one JSON object named {} that conforms to this JSON Schema:\n```json\n{}\n```",
            schema.name,
            serde_json::to_string_pretty(&schema.schema).unwrap_or_default()
        );
        let transport = with_system_section(render_for_transport(messages), &section);
        let output = self.complete(&transport).await?;
        parse_judgment(&output, &schema.name)
    }
}

fn invocation_protocol_section(capabilities: &[CapabilitySpec]) -> String {
    let catalogue: Vec<Value> = capabilities
        .iter()
        .map(|c| {
            serde_json::json!({
                "name": c.name,
                "description": c.description,
                "parameters": c.parameters,
            })
        })
        .collect();
    format!(
        "## Calling tools\n\
         To use tools, reply with ONLY a JSON object of the form \
         {{\"calls\": [{{\"tool\": \"<name>\", \"args\": {{...}}}}]}}. \
         Several calls in one object run together. Any other reply is treated as your answer.\n\
         Call format schema:\n```json\n{}\n```\n\
         Available tools:\n```json\n{}\n```",
        invocation_schema_json(),
        serde_json::to_string_pretty(&catalogue).unwrap_or_else(|_| "[]".to_string())
    )
}

/// 把能力调用与能力结果转成纯文本补全接口可以接受的消息
pub fn render_for_transport(messages: &[Message]) -> Vec<Message> {
    messages
        .iter()
        .map(|m| match m.role {
            Role::Assistant if m.requests_capabilities() => {
                let calls: Vec<Value> = m
                    .invocations
                    .iter()
                    .map(|i| serde_json::json!({ "tool": i.name, "args": i.arguments }))
                    .collect();
                Message::assistant(serde_json::json!({ "calls": calls }).to_string())
            }
            Role::Capability => Message::user(format!(
                "Observation from {} ({}):\n{}",
                m.name.as_deref().unwrap_or("tool"),
                m.invocation_id.as_deref().unwrap_or("-"),
                m.content
            )),
            _ => m.clone(),
        })
        .collect()
}

/// 在首条 System 消息末尾追加一段；没有 System 消息时插入一条
fn with_system_section(mut messages: Vec<Message>, section: &str) -> Vec<Message> {
    if section.is_empty() {
        return messages;
    }
    match messages.iter_mut().find(|m| m.role == Role::System) {
        Some(system) => {
            system.content.push_str("\n\n");
            system.content.push_str(section);
        }
        None => messages.insert(0, Message::system(section)),
    }
    messages
}

/// 提取 JSON 片段（```json ... ``` 或首个 `{`/`[` 到末个 `}`/`]`）
fn extract_json(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = text.find(['{', '['])?;
    let end = text.rfind(['}', ']'])?;
    (end > start).then(|| &text[start..=end])
}

/// 调用结构必须独占整段输出：裸 JSON，或只含一个 ``` 代码块
fn invocation_json(trimmed: &str) -> Option<&str> {
    if let Some(body) = trimmed.strip_prefix("```") {
        let body = body.strip_suffix("```")?;
        let body = body.strip_prefix("json").unwrap_or(body);
        return (!body.contains("```")).then(|| body.trim());
    }
    let starts = trimmed.starts_with(['{', '[']);
    let ends = trimmed.ends_with(['}', ']']);
    (starts && ends).then_some(trimmed)
}

#[derive(Deserialize)]
struct CallFormat {
    tool: String,
    #[serde(default)]
    args: Value,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CallEnvelope {
    Batch { calls: Vec<CallFormat> },
    Single(CallFormat),
    List(Vec<CallFormat>),
}

/// 解析模型输出：是合法调用结构且 tool 非空则为能力调用，否则整段视为回答
pub fn parse_generation(output: &str) -> Generation {
    let trimmed = output.trim();
    let calls = invocation_json(trimmed)
        .and_then(|json| serde_json::from_str::<CallEnvelope>(json).ok())
        .map(|envelope| match envelope {
            CallEnvelope::Batch { calls } | CallEnvelope::List(calls) => calls,
            CallEnvelope::Single(call) => vec![call],
        })
        .unwrap_or_default();

    let invocations: Vec<CapabilityInvocation> = calls
        .into_iter()
        .filter(|c| !c.tool.trim().is_empty())
        .map(|c| {
            let args = if c.args.is_null() { Value::Object(Default::default()) } else { c.args };
            CapabilityInvocation::new(c.tool.trim(), args)
        })
        .collect();

    if invocations.is_empty() {
        Generation::Reply(trimmed.to_string())
    } else {
        Generation::Invocations(invocations)
    }
}

fn parse_judgment(output: &str, schema_name: &str) -> Result<Value, LlmError> {
    let trimmed = output.trim();
    let json = extract_json(trimmed).ok_or_else(|| {
        LlmError::SchemaViolation(format!("{schema_name}: no JSON object in response"))
    })?;
    match serde_json::from_str::<Value>(json) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) => Err(LlmError::SchemaViolation(format!(
            "{schema_name}: expected a JSON object"
        ))),
        Err(e) => Err(LlmError::SchemaViolation(format!("{schema_name}: {e}"))),
    }
}
