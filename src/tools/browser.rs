//! Browser 能力：使用 Headless Chrome 渲染页面并提取可读文本
//!
//! 需启用 feature "browser" 且系统已安装 Chrome/Chromium。
//! Chrome 进程在首次调用时启动并在能力实例内复用，release() 时关闭。

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use headless_chrome::Browser;
use serde_json::{json, Value};

use crate::core::CapabilityError;
use crate::tools::fetch::{check_domain, html_to_text, limit_chars};
use crate::tools::Capability;

pub struct BrowserTool {
    allowed_domains: HashSet<String>,
    max_result_chars: usize,
    browser: Arc<Mutex<Option<Browser>>>,
}

impl BrowserTool {
    pub fn new(allowed_domains: Vec<String>, max_result_chars: usize) -> Self {
        Self {
            allowed_domains: allowed_domains.into_iter().map(|d| d.to_lowercase()).collect(),
            max_result_chars,
            browser: Arc::new(Mutex::new(None)),
        }
    }

    fn render(
        browser: &Arc<Mutex<Option<Browser>>>,
        url: &str,
        selector: Option<&str>,
    ) -> Result<String, CapabilityError> {
        let mut guard = browser
            .lock()
            .map_err(|e| CapabilityError::Execution(format!("browser lock poisoned: {e}")))?;
        if guard.is_none() {
            let launched = Browser::default().map_err(|e| {
                CapabilityError::Execution(format!(
                    "Chrome launch failed: {e}. Install Chrome/Chromium."
                ))
            })?;
            *guard = Some(launched);
        }
        let browser = guard
            .as_ref()
            .ok_or_else(|| CapabilityError::Execution("browser unavailable".to_string()))?;

        let tab = browser
            .new_tab()
            .map_err(|e| CapabilityError::Execution(format!("Browser tab failed: {e}")))?;
        tab.navigate_to(url)
            .map_err(|e| CapabilityError::Execution(format!("Navigate failed: {e}")))?;
        tab.wait_for_element("body")
            .map_err(|e| CapabilityError::Execution(format!("Page load failed: {e}")))?;

        let text = match selector {
            Some(sel) => tab
                .wait_for_element(sel)
                .map_err(|e| CapabilityError::Execution(format!("Element not found: {e}")))?
                .get_inner_text()
                .map_err(|e| CapabilityError::Execution(format!("Get text failed: {e}")))?,
            None => {
                let content = tab
                    .get_content()
                    .map_err(|e| CapabilityError::Execution(format!("Get content failed: {e}")))?;
                html_to_text(&content)
            }
        };
        let _ = tab.close(true);
        Ok(text)
    }
}

#[async_trait]
impl Capability for BrowserTool {
    fn name(&self) -> &str {
        "browser"
    }

    fn description(&self) -> &str {
        "Render a page in a headless browser (for JavaScript-heavy sites) and return its text. Args: {\"url\": \"https://...\", \"selector\": \"optional CSS selector\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string" },
                "selector": { "type": "string", "description": "Only return text of this element" }
            },
            "required": ["url"]
        })
    }

    async fn invoke(&self, args: Value) -> Result<String, CapabilityError> {
        let url = args.get("url").and_then(|v| v.as_str()).unwrap_or("").trim().to_string();
        if url.is_empty() {
            return Err(CapabilityError::InvalidArguments("Missing url".to_string()));
        }
        check_domain(&self.allowed_domains, &url)?;
        let selector = args.get("selector").and_then(|v| v.as_str()).map(String::from);
        tracing::info!(url = %url, selector = ?selector, "browser render");

        let browser = Arc::clone(&self.browser);
        let max_chars = self.max_result_chars;
        tokio::task::spawn_blocking(move || {
            Self::render(&browser, &url, selector.as_deref()).map(|t| limit_chars(t, max_chars))
        })
        .await
        .map_err(|e| CapabilityError::Execution(format!("Task join: {e}")))?
    }

    /// 关闭 Chrome 进程；未启动过时为空操作
    async fn release(&self) -> Result<(), CapabilityError> {
        let browser = Arc::clone(&self.browser);
        tokio::task::spawn_blocking(move || {
            let mut guard = browser
                .lock()
                .map_err(|e| CapabilityError::Release(format!("browser lock poisoned: {e}")))?;
            if guard.take().is_some() {
                tracing::debug!("headless browser closed");
            }
            Ok(())
        })
        .await
        .map_err(|e| CapabilityError::Release(format!("Task join: {e}")))?
    }
}
