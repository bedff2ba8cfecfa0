//! ProfileExtractor：从一轮对话中抽取持久的用户事实
//!
//! 在轮次结束后作为后台任务运行，任何失败只记日志。写入以互斥锁串行化，
//! 并发的多次抽取不会交错写入。

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::core::{AgentError, TaskScheduler};
use crate::llm::{judge_as, ReasoningClient};
use crate::memory::{truncate_chars, Message, ProfileStore};

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExtractedFact {
    /// Short snake_case label, e.g. name, location, preferred_language
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ProfileUpdate {
    /// New or updated facts; empty when nothing worth remembering was said
    pub facts: Vec<ExtractedFact>,
}

#[derive(Clone)]
pub struct ProfileExtractor {
    reasoner: Arc<dyn ReasoningClient>,
    profile: Arc<dyn ProfileStore>,
    reply_chars: usize,
    write_lock: Arc<Mutex<()>>,
}

impl ProfileExtractor {
    pub fn new(
        reasoner: Arc<dyn ReasoningClient>,
        profile: Arc<dyn ProfileStore>,
        reply_chars: usize,
    ) -> Self {
        Self {
            reasoner,
            profile,
            reply_chars,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// 抽取并写入；返回写入的事实数
    pub async fn extract(&self, user_message: &str, reply: &str) -> Result<usize, AgentError> {
        let existing = self.profile.get_all().await?;
        let known = if existing.is_empty() {
            "none yet".to_string()
        } else {
            existing
                .iter()
                .map(|(k, v)| format!("{k}: {v}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let (reply, _) = truncate_chars(reply, self.reply_chars);
        let prompt = format!(
            "Extract any personal facts about the user from this conversation exchange.\n\
             Only extract clear, explicit facts such as name, location, job, preferences or goals.\n\
             If there is nothing new or notable, return an empty facts list.\n\n\
             Already known facts:\n{known}\n\n\
             User said: {user_message}\n\
             Assistant replied: {reply}"
        );

        let update: ProfileUpdate = judge_as(self.reasoner.as_ref(), &[Message::user(prompt)]).await?;

        let _guard = self.write_lock.lock().await;
        let mut written = 0;
        for fact in update.facts {
            self.profile.upsert(&fact.key, &fact.value).await?;
            written += 1;
        }
        if written > 0 {
            tracing::info!(facts = written, "user profile updated");
        }
        Ok(written)
    }

    /// 作为后台任务运行
    pub fn spawn(&self, scheduler: &TaskScheduler, user_message: String, reply: String) {
        let extractor = self.clone();
        scheduler.spawn_background("profile_extraction", async move {
            extractor.extract(&user_message, &reply).await.map(|_| ())
        });
    }
}
