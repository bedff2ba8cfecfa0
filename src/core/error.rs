//! Agent 错误类型
//!
//! 分三层：LlmError（推理客户端，见 llm::traits）、CapabilityError（单次能力调用）、
//! PersistenceError（SQLite 存储）。控制循环只向调用方暴露 AgentError。
//! 能力调用失败不会成为 AgentError：Dispatch 会把它转成一条结果消息交回 Worker。

use thiserror::Error;

use crate::llm::LlmError;

/// 一轮对话（或会话管理操作）中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 推理服务不可用或超时，整轮中止
    #[error("LLM error: {0}")]
    Llm(LlmError),

    /// 需要结构化输出（Evaluator / Extractor）时，模型返回不符合 schema
    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Turn cancelled")]
    Cancelled,

    /// 状态机收到与当前步骤不匹配的转移（实现缺陷，不应在运行期出现）
    #[error("Invalid transition from {from} on {transition}")]
    InvalidTransition { from: String, transition: String },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// 同一会话上已有一轮在进行
    #[error("A turn is already running on session {0}")]
    TurnInProgress(String),

    /// 后台轮次任务 panic 或被中止
    #[error("Turn task failed: {0}")]
    TaskFailed(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl From<LlmError> for AgentError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::SchemaViolation(detail) => AgentError::SchemaViolation(detail),
            other => AgentError::Llm(other),
        }
    }
}

/// 单次能力调用失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// 模型请求了未注册的能力
    #[error("CapabilityNotFound: {0}")]
    NotFound(String),

    #[error("CapabilityInvalidArguments: {0}")]
    InvalidArguments(String),

    #[error("CapabilityExecutionError: {0}")]
    Execution(String),

    #[error("CapabilityTimeout: {name} exceeded {secs}s")]
    Timeout { name: String, secs: u64 },

    /// 释放持有的外部资源（浏览器进程、连接等）失败
    #[error("ResourceReleaseError: {0}")]
    Release(String),
}

/// 持久化层错误（会话、对话记录、画像、检查点）
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// 存储中的数据无法解析（时间戳、角色、步骤名）
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("unsupported checkpoint version {found} (expected {expected})")]
    UnsupportedCheckpointVersion { found: u32, expected: u32 },

    /// 阻塞线程池任务失败
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}
