//! 轮次的流式输出：用户可见的历史快照
//!
//! 每个快照都是完整的可见历史（旧历史 + 本轮新增），后一个快照总是前一个的延长。
//! 能力调用与结果在发生时即推送；最终回答与 Evaluator 反馈在轮次结束时推送。

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::memory::{Role, TranscriptEntry};
use crate::tools::{CapabilityInvocation, CapabilityResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayRole {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMetadata {
    pub title: String,
}

/// 一条用户可见消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMessage {
    pub role: DisplayRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DisplayMetadata>,
}

impl DisplayMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: DisplayRole::User,
            content: content.into(),
            metadata: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: DisplayRole::Assistant,
            content: content.into(),
            metadata: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.metadata = Some(DisplayMetadata { title: title.into() });
        self
    }

    pub fn title(&self) -> Option<&str> {
        self.metadata.as_ref().map(|m| m.title.as_str())
    }

    /// `**name**(key=value, ...)`，每个参数值最多 80 个字符
    pub fn invocation(invocation: &CapabilityInvocation) -> Self {
        let args = match &invocation.arguments {
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| format!("{k}={}", truncate_arg(v)))
                .collect::<Vec<_>>()
                .join(", "),
            Value::Null => String::new(),
            other => truncate_arg(other),
        };
        Self::assistant(format!("**{}**({args})", invocation.name)).with_title("Calling tool")
    }

    pub fn capability_result(result: &CapabilityResult) -> Self {
        Self::assistant(result.display.clone()).with_title(format!("Result: {}", result.name))
    }

    pub fn from_transcript(entry: &TranscriptEntry) -> Self {
        match entry.role {
            Role::User => Self::user(entry.content.clone()),
            _ => Self::assistant(entry.content.clone()),
        }
    }
}

fn truncate_arg(value: &Value) -> String {
    let rendered = match value {
        Value::String(s) => format!("{s:?}"),
        other => other.to_string(),
    };
    rendered.chars().take(80).collect()
}

/// 某一时刻的完整可见历史
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub messages: Vec<DisplayMessage>,
}

impl HistorySnapshot {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&DisplayMessage> {
        self.messages.last()
    }

    /// 是否以 prefix 的全部消息开头
    pub fn extends(&self, prefix: &HistorySnapshot) -> bool {
        self.messages.starts_with(&prefix.messages)
    }
}

/// 累积可见历史并推送快照；接收方已断开时静默丢弃
pub(crate) struct SnapshotEmitter {
    history: Vec<DisplayMessage>,
    tx: mpsc::UnboundedSender<HistorySnapshot>,
}

impl SnapshotEmitter {
    pub(crate) fn new(history: Vec<DisplayMessage>, tx: mpsc::UnboundedSender<HistorySnapshot>) -> Self {
        Self { history, tx }
    }

    pub(crate) fn push(&mut self, message: DisplayMessage) {
        self.history.push(message);
    }

    pub(crate) fn extend(&mut self, messages: impl IntoIterator<Item = DisplayMessage>) {
        self.history.extend(messages);
    }

    pub(crate) fn emit(&self) {
        let _ = self.tx.send(self.snapshot());
    }

    pub(crate) fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            messages: self.history.clone(),
        }
    }
}

/// 一轮结束后的结果
#[derive(Clone, Debug)]
pub struct TurnOutcome {
    pub session_id: String,
    /// 最终候选回答；Worker 一次都没给出回答时为 None
    pub reply: Option<String>,
    pub feedback: Option<String>,
    pub success_criteria_met: bool,
    pub user_input_needed: bool,
    pub history: HistorySnapshot,
}

/// 一轮对话的快照流
///
/// 轮次在后台任务中运行；丢弃 TurnStream 不会中止它，需要中止时调用 cancel。
pub struct TurnStream {
    rx: mpsc::UnboundedReceiver<HistorySnapshot>,
    handle: JoinHandle<Result<TurnOutcome, AgentError>>,
    cancel: CancellationToken,
}

impl TurnStream {
    pub(crate) fn new(
        rx: mpsc::UnboundedReceiver<HistorySnapshot>,
        handle: JoinHandle<Result<TurnOutcome, AgentError>>,
        cancel: CancellationToken,
    ) -> Self {
        Self { rx, handle, cancel }
    }

    pub async fn next_snapshot(&mut self) -> Option<HistorySnapshot> {
        self.rx.recv().await
    }

    /// 请求中止；进行中的步骤结束后轮次以 Cancelled 返回
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// 丢弃剩余快照，等待轮次结果
    pub async fn finish(mut self) -> Result<TurnOutcome, AgentError> {
        while self.rx.recv().await.is_some() {}
        self.handle
            .await
            .map_err(|e| AgentError::TaskFailed(e.to_string()))?
    }

    /// 收集全部快照与轮次结果
    pub async fn collect_all(mut self) -> (Vec<HistorySnapshot>, Result<TurnOutcome, AgentError>) {
        let mut snapshots = Vec::new();
        while let Some(snapshot) = self.rx.recv().await {
            snapshots.push(snapshot);
        }
        let outcome = match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => Err(AgentError::TaskFailed(e.to_string())),
        };
        (snapshots, outcome)
    }
}

impl Stream for TurnStream {
    type Item = HistorySnapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn invocation_display_truncates_each_argument() {
        let long = "y".repeat(200);
        let call = CapabilityInvocation::new("write_file", json!({ "path": "a.txt", "text": long }));
        let shown = DisplayMessage::invocation(&call);
        assert_eq!(shown.title(), Some("Calling tool"));
        assert!(shown.content.starts_with("**write_file**(path=\"a.txt\", text=\""));
        let text_arg = shown.content.split("text=").nth(1).unwrap();
        assert_eq!(text_arg.trim_end_matches(')').chars().count(), 80);
    }

    #[test]
    fn snapshot_extension() {
        let a = HistorySnapshot { messages: vec![DisplayMessage::user("hi")] };
        let b = HistorySnapshot {
            messages: vec![DisplayMessage::user("hi"), DisplayMessage::assistant("yo")],
        };
        assert!(b.extends(&a));
        assert!(!a.extends(&b));
    }
}
