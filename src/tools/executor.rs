//! 能力执行器
//!
//! 持有 CapabilityRegistry 与单次调用超时。invoke 从不返回错误：未注册、参数错误、执行失败、
//! 超时都转成一条 CapabilityResult 交回 Worker，让模型自行纠正。每次调用输出结构化审计日志（JSON）。

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::core::{CapabilityError, TaskScheduler};
use crate::memory::preview;
use crate::tools::{CapabilityInvocation, CapabilityRegistry, CapabilitySpec};

/// 单次调用的结局
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationOutcome {
    Ok,
    NotFound,
    Failed,
    TimedOut,
}

impl InvocationOutcome {
    fn as_str(self) -> &'static str {
        match self {
            InvocationOutcome::Ok => "ok",
            InvocationOutcome::NotFound => "not_found",
            InvocationOutcome::Failed => "error",
            InvocationOutcome::TimedOut => "timeout",
        }
    }
}

/// 能力调用结果：content 为完整内容（回填给 Worker），display 为展示用截断版本
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapabilityResult {
    pub invocation_id: String,
    pub name: String,
    pub content: String,
    pub display: String,
    pub outcome: InvocationOutcome,
}

impl CapabilityResult {
    pub fn is_ok(&self) -> bool {
        self.outcome == InvocationOutcome::Ok
    }
}

/// 能力执行器：超时、失败转数据、审计日志、资源只释放一次
pub struct CapabilityExecutor {
    registry: CapabilityRegistry,
    timeout: Duration,
    preview_chars: usize,
    released: AtomicBool,
}

impl CapabilityExecutor {
    pub fn new(registry: CapabilityRegistry, timeout: Duration, preview_chars: usize) -> Self {
        Self {
            registry,
            timeout,
            preview_chars,
            released: AtomicBool::new(false),
        }
    }

    pub fn catalogue(&self) -> Vec<CapabilitySpec> {
        self.registry.catalogue()
    }

    pub fn names(&self) -> Vec<String> {
        self.registry.names()
    }

    pub async fn invoke(&self, invocation: &CapabilityInvocation) -> CapabilityResult {
        let start = Instant::now();
        let result = match self.registry.get(&invocation.name) {
            None => Err(CapabilityError::NotFound(invocation.name.clone())),
            Some(capability) => {
                match timeout(self.timeout, capability.invoke(invocation.arguments.clone())).await {
                    Ok(r) => r,
                    Err(_) => Err(CapabilityError::Timeout {
                        name: invocation.name.clone(),
                        secs: self.timeout.as_secs(),
                    }),
                }
            }
        };

        let outcome = match &result {
            Ok(_) => InvocationOutcome::Ok,
            Err(CapabilityError::NotFound(_)) => InvocationOutcome::NotFound,
            Err(CapabilityError::Timeout { .. }) => InvocationOutcome::TimedOut,
            Err(_) => InvocationOutcome::Failed,
        };
        let audit = serde_json::json!({
            "event": "capability_audit",
            "capability": invocation.name,
            "invocation_id": invocation.id,
            "ok": outcome == InvocationOutcome::Ok,
            "outcome": outcome.as_str(),
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": preview(&invocation.arguments.to_string(), 200),
        });
        tracing::info!(audit = %audit, "capability");

        let content = match result {
            Ok(content) => content,
            Err(e) => e.to_string(),
        };
        CapabilityResult {
            invocation_id: invocation.id.clone(),
            name: invocation.name.clone(),
            display: preview(&content, self.preview_chars),
            content,
            outcome,
        }
    }

    /// 并发执行一批调用（受调度器并发上限约束），结果顺序与调用顺序一致
    pub async fn invoke_batch(
        &self,
        invocations: &[CapabilityInvocation],
        scheduler: &TaskScheduler,
    ) -> Vec<CapabilityResult> {
        join_all(invocations.iter().map(|invocation| async move {
            let _permit = scheduler.acquire_capability().await;
            self.invoke(invocation).await
        }))
        .await
    }

    /// 释放所有能力持有的资源；重复调用不会再次释放
    pub async fn release(&self) -> Result<(), CapabilityError> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let failures = self.registry.release_all().await;
        if failures.is_empty() {
            return Ok(());
        }
        let detail = failures
            .iter()
            .map(|(name, e)| format!("{name}: {e}"))
            .collect::<Vec<_>>()
            .join("; ");
        Err(CapabilityError::Release(detail))
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}
