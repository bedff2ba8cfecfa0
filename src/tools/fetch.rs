//! 网页抓取能力：域名白名单、超时、结果大小限制
//!
//! allowed_domains 为空时不限制域名；GET 请求带超时与 User-Agent；
//! 响应超过 max_result_chars 时截断并追加 ...[truncated]。
//! 对 HTML 响应使用 html2text 提取可读文本，去除标签与脚本。

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use html2text::from_read;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Client;
use serde_json::{json, Value};

use crate::core::CapabilityError;
use crate::tools::Capability;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// 简易去除 HTML 标签（html2text 失败时的回退）
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    s.starts_with("<!")
        || s.to_ascii_lowercase().starts_with("<html")
        || (s.contains("</") && (s.contains("<head") || s.contains("<body") || s.contains("<title")))
}

pub(crate) fn html_to_text(html: &str) -> String {
    match from_read(html.as_bytes(), 120) {
        Ok(text) if !text.trim().is_empty() => text,
        _ => strip_html_tags(html),
    }
}

/// 从 URL 中提取 host（小写、去掉端口）
pub(crate) fn extract_domain(url: &str) -> Option<String> {
    let url = url.trim();
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.rsplit('@').next()?.split(':').next()?;
    (!host.is_empty()).then(|| host.to_lowercase())
}

/// 域名校验；allowed 为空表示不限制
pub(crate) fn check_domain(allowed: &HashSet<String>, url: &str) -> Result<(), CapabilityError> {
    let domain = extract_domain(url)
        .ok_or_else(|| CapabilityError::InvalidArguments(format!("Invalid URL: {url}")))?;
    if allowed.is_empty() || allowed.contains(&domain) {
        Ok(())
    } else {
        Err(CapabilityError::InvalidArguments(format!(
            "Domain not in allowlist: {domain}"
        )))
    }
}

pub(crate) fn limit_chars(body: String, max_chars: usize) -> String {
    if body.chars().count() > max_chars {
        body.chars().take(max_chars).collect::<String>() + "\n...[truncated]"
    } else {
        body
    }
}

/// 抓取网页并返回可读文本
pub struct FetchPageTool {
    client: Client,
    allowed_domains: HashSet<String>,
    max_result_chars: usize,
}

impl FetchPageTool {
    pub fn new(allowed_domains: Vec<String>, timeout_secs: u64, max_result_chars: usize) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9,zh-CN;q=0.8"));
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .unwrap_or_default();
        Self {
            client,
            allowed_domains: allowed_domains.into_iter().map(|d| d.to_lowercase()).collect(),
            max_result_chars,
        }
    }

    async fn fetch(&self, url: &str) -> Result<String, CapabilityError> {
        check_domain(&self.allowed_domains, url)?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CapabilityError::Execution(format!("Request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(CapabilityError::Execution(format!("HTTP {}", resp.status())));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| CapabilityError::Execution(format!("Read body: {e}")))?;
        let body = body.trim_start_matches('\u{FEFF}');
        let text = if looks_like_html(body) {
            html_to_text(body)
        } else {
            body.to_string()
        };
        Ok(limit_chars(text, self.max_result_chars))
    }
}

#[async_trait]
impl Capability for FetchPageTool {
    fn name(&self) -> &str {
        "fetch_page"
    }

    fn description(&self) -> &str {
        "Fetch a web page over HTTP(S) and return its readable text. Args: {\"url\": \"https://...\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "url": { "type": "string", "description": "Absolute http(s) URL" } },
            "required": ["url"]
        })
    }

    async fn invoke(&self, args: Value) -> Result<String, CapabilityError> {
        let url = args.get("url").and_then(|v| v.as_str()).unwrap_or("").trim();
        if url.is_empty() {
            return Err(CapabilityError::InvalidArguments("Missing url".to_string()));
        }
        tracing::info!(url = %url, "fetch_page");
        self.fetch(url).await
    }
}
