//! 记忆上下文组装
//!
//! 每次 Worker 步骤前重新读取画像与最近对话，渲染为一段文本拼进系统提示词。
//! 不做缓存：Extractor 刚写入的事实在下一次 Worker 步骤就能看到。

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::PersistenceError;
use crate::memory::{truncate_chars, ProfileStore, Role, TranscriptEntry, TranscriptStore};

/// 记忆片段的大小限制
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryLimits {
    /// 最多带入多少对 (user, assistant)
    pub recent_pairs: usize,
    /// 每条记录截取的字符数
    pub entry_chars: usize,
}

impl Default for MemoryLimits {
    fn default() -> Self {
        Self {
            recent_pairs: 3,
            entry_chars: 300,
        }
    }
}

#[derive(Clone)]
pub struct MemoryAssembler {
    profile: Arc<dyn ProfileStore>,
    transcripts: Arc<dyn TranscriptStore>,
    limits: MemoryLimits,
}

impl MemoryAssembler {
    pub fn new(
        profile: Arc<dyn ProfileStore>,
        transcripts: Arc<dyn TranscriptStore>,
        limits: MemoryLimits,
    ) -> Self {
        Self {
            profile,
            transcripts,
            limits,
        }
    }

    pub async fn assemble(&self, session_id: &str) -> Result<String, PersistenceError> {
        let facts = self.profile.get_all().await?;
        let recent = self
            .transcripts
            .recent(session_id, self.limits.recent_pairs * 2)
            .await?;
        Ok(render_memory(&facts, &recent, &self.limits))
    }
}

/// 渲染记忆片段；没有任何内容时为空串
pub fn render_memory(
    facts: &BTreeMap<String, String>,
    recent: &[TranscriptEntry],
    limits: &MemoryLimits,
) -> String {
    let mut sections = Vec::new();

    if !facts.is_empty() {
        let mut block = String::from("Known facts about this user:");
        for (key, value) in facts {
            block.push_str(&format!("\n  {key}: {value}"));
        }
        sections.push(block);
    }

    let tail = &recent[recent.len().saturating_sub(limits.recent_pairs * 2)..];
    if !tail.is_empty() {
        let mut block = String::from("Recent conversation history:");
        for entry in tail {
            let speaker = if entry.role == Role::User { "User" } else { "Assistant" };
            let (content, _) = truncate_chars(&entry.content, limits.entry_chars);
            block.push_str(&format!("\n  {speaker}: {content}"));
        }
        sections.push(block);
    }

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(role: Role, content: &str) -> TranscriptEntry {
        TranscriptEntry {
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn empty_memory_renders_nothing() {
        assert_eq!(render_memory(&BTreeMap::new(), &[], &MemoryLimits::default()), "");
    }

    #[test]
    fn facts_and_history_are_separate_sections() {
        let facts = BTreeMap::from([("name".to_string(), "Ada".to_string())]);
        let recent = vec![entry(Role::User, "hi"), entry(Role::Assistant, "hello")];
        let text = render_memory(&facts, &recent, &MemoryLimits::default());
        assert_eq!(
            text,
            "Known facts about this user:\n  name: Ada\n\nRecent conversation history:\n  User: hi\n  Assistant: hello"
        );
    }

    #[test]
    fn entries_are_cut_to_the_char_limit() {
        let limits = MemoryLimits {
            recent_pairs: 1,
            entry_chars: 5,
        };
        let recent = vec![entry(Role::User, "abcdefgh"), entry(Role::Assistant, "ok")];
        let text = render_memory(&BTreeMap::new(), &recent, &limits);
        assert!(text.contains("  User: abcde\n"));
        assert!(!text.contains("abcdef"));
    }
}
