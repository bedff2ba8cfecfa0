//! 能力注册表
//!
//! 所有能力实现 Capability trait（name / description / parameters_schema / invoke / release），
//! 由 CapabilityRegistry 按名注册与查找；CapabilityExecutor 在调用时加超时并把失败转为结果数据。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::core::CapabilityError;

/// 能力 trait：名称、描述（供模型理解）、参数 schema、异步调用、资源释放
#[async_trait]
pub trait Capability: Send + Sync {
    /// 能力名（调用 JSON 中的 "tool" 字段）
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认表示无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn invoke(&self, args: Value) -> Result<String, CapabilityError>;

    /// 释放持有的外部资源；无资源的能力保持默认实现
    async fn release(&self) -> Result<(), CapabilityError> {
        Ok(())
    }
}

/// 模型发起的一次能力调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapabilityInvocation {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl CapabilityInvocation {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: format!("call_{}", Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
        }
    }
}

/// 暴露给推理客户端的能力目录项
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 能力注册表：按名称有序存储，目录顺序稳定
#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: BTreeMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, capability: impl Capability + 'static) {
        self.register_arc(Arc::new(capability));
    }

    pub fn register_arc(&mut self, capability: Arc<dyn Capability>) {
        let name = capability.name().to_string();
        if self.capabilities.insert(name.clone(), capability).is_some() {
            tracing::warn!(capability = %name, "capability registered twice, keeping the latest");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.capabilities.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    pub fn catalogue(&self) -> Vec<CapabilitySpec> {
        self.capabilities
            .values()
            .map(|c| CapabilitySpec {
                name: c.name().to_string(),
                description: c.description().to_string(),
                parameters: c.parameters_schema(),
            })
            .collect()
    }

    /// 逐个释放；单个失败不影响其余，返回所有失败
    pub async fn release_all(&self) -> Vec<(String, CapabilityError)> {
        let mut failures = Vec::new();
        for (name, capability) in &self.capabilities {
            if let Err(e) = capability.release().await {
                failures.push((name.clone(), e));
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl Capability for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "test"
        }
        async fn invoke(&self, _args: Value) -> Result<String, CapabilityError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn catalogue_is_sorted_by_name() {
        let mut registry = CapabilityRegistry::new();
        registry.register(Named("write_file"));
        registry.register(Named("fetch_page"));
        let names: Vec<_> = registry.catalogue().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["fetch_page", "write_file"]);
    }

    #[test]
    fn invocation_ids_are_unique() {
        let a = CapabilityInvocation::new("x", Value::Null);
        let b = CapabilityInvocation::new("x", Value::Null);
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("call_"));
    }
}
