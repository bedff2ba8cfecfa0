//! LLM 层：文本补全客户端（OpenAI 兼容 / DeepSeek / Mock）与推理接口（generate / judge）

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod protocol;
pub mod traits;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use mock::{MockLlmClient, ScriptedReasoner};
pub use openai::{OpenAiClient, TokenUsage};
pub use protocol::JsonProtocolReasoner;
pub use traits::{judge_as, Generation, JudgeSchema, LlmClient, LlmError, ReasoningClient};
