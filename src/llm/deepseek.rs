//! DeepSeek 后端（OpenAI 兼容协议）

use crate::llm::OpenAiClient;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";
pub const DEEPSEEK_REASONER: &str = "deepseek-reasoner";

/// 模型名：配置值优先，其次环境变量 DEEPSEEK_MODEL，最后 deepseek-chat
fn resolve_model(configured: Option<&str>, env_model: Option<String>) -> String {
    configured
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(String::from)
        .or(env_model.filter(|m| !m.trim().is_empty()))
        .unwrap_or_else(|| DEEPSEEK_CHAT.to_string())
}

/// API Key 取 DEEPSEEK_API_KEY，没有时退回 OPENAI_API_KEY
pub fn create_deepseek_client(model: Option<&str>, base_url: Option<&str>) -> OpenAiClient {
    let api_key = std::env::var("DEEPSEEK_API_KEY")
        .or_else(|_| std::env::var("OPENAI_API_KEY"))
        .ok();
    let model = resolve_model(model, std::env::var("DEEPSEEK_MODEL").ok());
    OpenAiClient::new(
        Some(base_url.unwrap_or(DEEPSEEK_BASE_URL)),
        &model,
        api_key.as_deref(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_model_wins_over_environment() {
        assert_eq!(resolve_model(Some(DEEPSEEK_REASONER), Some("x".into())), DEEPSEEK_REASONER);
        assert_eq!(resolve_model(Some("  "), Some("custom".into())), "custom");
        assert_eq!(resolve_model(None, None), DEEPSEEK_CHAT);
    }
}
