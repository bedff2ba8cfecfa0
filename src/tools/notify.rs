//! 推送通知能力（Pushover）
//!
//! 需要环境变量 PUSHOVER_TOKEN 与 PUSHOVER_USER；缺失时不注册。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::core::CapabilityError;
use crate::tools::Capability;

const PUSHOVER_URL: &str = "https://api.pushover.net/1/messages.json";

pub struct PushNotificationTool {
    client: Client,
    token: String,
    user: String,
    endpoint: String,
}

impl PushNotificationTool {
    pub fn new(token: impl Into<String>, user: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            client,
            token: token.into(),
            user: user.into(),
            endpoint: PUSHOVER_URL.to_string(),
        }
    }

    /// 从环境变量构造；任一缺失或为空时返回 None
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("PUSHOVER_TOKEN").ok().filter(|t| !t.trim().is_empty())?;
        let user = std::env::var("PUSHOVER_USER").ok().filter(|u| !u.trim().is_empty())?;
        Some(Self::new(token, user))
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl Capability for PushNotificationTool {
    fn name(&self) -> &str {
        "send_push_notification"
    }

    fn description(&self) -> &str {
        "Send a push notification to the user's phone. Args: {\"text\": \"message\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "text": { "type": "string", "description": "Notification body" } },
            "required": ["text"]
        })
    }

    async fn invoke(&self, args: Value) -> Result<String, CapabilityError> {
        let text = args
            .get("text")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CapabilityError::InvalidArguments("Missing text".to_string()))?;
        tracing::info!(chars = text.chars().count(), "send_push_notification");

        let form = [
            ("token", self.token.as_str()),
            ("user", self.user.as_str()),
            ("message", text),
        ];
        let resp = self
            .client
            .post(&self.endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| CapabilityError::Execution(format!("Pushover request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(CapabilityError::Execution(format!("Pushover HTTP {}", resp.status())));
        }
        Ok("success".to_string())
    }
}
