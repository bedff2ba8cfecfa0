//! 能力调用 JSON Schema 生成
//!
//! 将「合法调用」的 JSON 结构注入系统提示词，减少模型输出格式错误。

use schemars::{schema_for, JsonSchema};
use serde_json::Value;
use std::collections::HashMap;

/// 单次调用：`{"tool": "...", "args": {...}}`（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct InvocationFormat {
    /// 能力名，如 read_file、write_file、fetch_page
    pub tool: String,
    /// 能力参数，依能力不同而不同
    pub args: HashMap<String, Value>,
}

/// 一次请求多个调用：`{"calls": [...]}`
#[allow(dead_code)]
#[derive(JsonSchema)]
struct InvocationBatchFormat {
    pub calls: Vec<InvocationFormat>,
}

/// 返回批量调用格式的 JSON Schema 字符串，可拼入系统提示词
pub fn invocation_schema_json() -> String {
    let schema = schema_for!(InvocationBatchFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
