//! Sidekick - Rust 任务执行智能体
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 轮次状态机、编排器、构建器、会话监管、任务调度
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）及推理协议
//! - **memory**: 线程化消息、会话、对话记录、用户画像与检查点的 SQLite 持久化
//! - **observability**: 日志初始化
//! - **react**: Worker、Evaluator、ProfileExtractor 与控制循环
//! - **tools**: 能力注册表、执行器与内置能力（文件、网页、推送、浏览器）

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;
