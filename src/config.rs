//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SIDEKICK__*` 覆盖（双下划线表示嵌套，如 `SIDEKICK__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub orchestrator: OrchestratorSection,
    pub memory: MemorySection,
    pub capabilities: CapabilitiesSection,
}

/// [app] 段：应用名、数据目录、沙箱目录
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// SQLite 文件所在目录，未设置时用 ./data
    pub data_dir: Option<PathBuf>,
    /// 文件能力的沙箱根目录，未设置时用 ./sandbox
    pub sandbox_root: Option<PathBuf>,
}

impl AppSection {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| PathBuf::from("data"))
    }

    pub fn sandbox_root(&self) -> PathBuf {
        self.sandbox_root.clone().unwrap_or_else(|| PathBuf::from("sandbox"))
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// deepseek / openai / mock；deepseek 与 openai 缺少 API Key 时回退到 mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 单次推理请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    120
}

/// [orchestrator] 段：默认成功标准、评估次数上限、结果预览长度、能力并发
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    #[serde(default = "default_success_criteria")]
    pub default_success_criteria: String,
    /// 单轮最多评估次数；不设置表示不限
    pub max_evaluations: Option<usize>,
    #[serde(default = "default_result_preview_chars")]
    pub result_preview_chars: usize,
    #[serde(default = "default_max_concurrent_capabilities")]
    pub max_concurrent_capabilities: usize,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            default_success_criteria: default_success_criteria(),
            max_evaluations: None,
            result_preview_chars: default_result_preview_chars(),
            max_concurrent_capabilities: default_max_concurrent_capabilities(),
        }
    }
}

pub fn default_success_criteria() -> String {
    "The answer should be clear and accurate".to_string()
}

fn default_result_preview_chars() -> usize {
    500
}

fn default_max_concurrent_capabilities() -> usize {
    3
}

/// [memory] 段：记忆片段大小与画像抽取时的回答截断长度
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    #[serde(default = "default_recent_pairs")]
    pub recent_pairs: usize,
    #[serde(default = "default_entry_chars")]
    pub entry_chars: usize,
    #[serde(default = "default_extractor_reply_chars")]
    pub extractor_reply_chars: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            recent_pairs: default_recent_pairs(),
            entry_chars: default_entry_chars(),
            extractor_reply_chars: default_extractor_reply_chars(),
        }
    }
}

fn default_recent_pairs() -> usize {
    3
}

fn default_entry_chars() -> usize {
    300
}

fn default_extractor_reply_chars() -> usize {
    500
}

/// [capabilities] 段：单次调用超时、网页抓取、推送通知
#[derive(Debug, Clone, Deserialize)]
pub struct CapabilitiesSection {
    #[serde(default = "default_capability_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub fetch: FetchSection,
    #[serde(default)]
    pub notify: NotifySection,
}

impl Default for CapabilitiesSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_capability_timeout_secs(),
            fetch: FetchSection::default(),
            notify: NotifySection::default(),
        }
    }
}

fn default_capability_timeout_secs() -> u64 {
    60
}

/// [capabilities.fetch] 段：抓取超时、最大字符数、允许的域名白名单（空表示不限制）
#[derive(Debug, Clone, Deserialize)]
pub struct FetchSection {
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_result_chars")]
    pub max_result_chars: usize,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
            max_result_chars: default_max_result_chars(),
            allowed_domains: Vec::new(),
        }
    }
}

fn default_fetch_timeout_secs() -> u64 {
    15
}

fn default_max_result_chars() -> usize {
    8000
}

/// [capabilities.notify] 段：Pushover 推送；凭据从 PUSHOVER_TOKEN / PUSHOVER_USER 读取
#[derive(Debug, Clone, Deserialize, Default)]
pub struct NotifySection {
    #[serde(default)]
    pub enabled: bool,
}

/// 从 config 目录加载配置，环境变量 SIDEKICK__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SIDEKICK__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SIDEKICK")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
