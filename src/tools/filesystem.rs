//! 沙箱文件能力
//!
//! SafeFs 绑定 root_dir，所有路径必须落在 root 下（禁止绝对路径与 ../ 逃逸，读取时再校验符号链接）；
//! read_file / write_file / list_directory 基于 SafeFs。

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::CapabilityError;
use crate::tools::Capability;

/// 沙箱文件系统
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 词法校验：只允许普通的相对路径分量
    fn join_relative(&self, path: &str) -> Result<PathBuf, CapabilityError> {
        let rel = Path::new(path.trim().trim_start_matches("./"));
        let escapes = rel.components().any(|c| {
            matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_))
        });
        if escapes {
            return Err(CapabilityError::InvalidArguments(format!(
                "path escapes sandbox: {path}"
            )));
        }
        Ok(self.root_dir.join(rel))
    }

    /// 已存在路径：词法校验后再规范化，拒绝指向沙箱外的符号链接
    pub fn resolve(&self, path: &str) -> Result<PathBuf, CapabilityError> {
        let full = self.join_relative(path)?;
        let canonical = full
            .canonicalize()
            .map_err(|_| CapabilityError::Execution(format!("Path not found: {path}")))?;
        if canonical.starts_with(&self.root_dir) {
            Ok(canonical)
        } else {
            Err(CapabilityError::InvalidArguments(format!(
                "path escapes sandbox: {path}"
            )))
        }
    }

    pub fn read_file(&self, path: &str) -> Result<String, CapabilityError> {
        let resolved = self.resolve(path)?;
        std::fs::read_to_string(&resolved)
            .map_err(|e| CapabilityError::Execution(format!("Read failed: {e}")))
    }

    /// 写入（覆盖）文件，按需创建父目录；返回写入的字节数
    pub fn write_file(&self, path: &str, text: &str) -> Result<usize, CapabilityError> {
        if path.trim().is_empty() {
            return Err(CapabilityError::InvalidArguments("Missing path".to_string()));
        }
        let target = self.join_relative(path)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CapabilityError::Execution(format!("Create dir failed: {e}")))?;
            let parent = parent
                .canonicalize()
                .map_err(|e| CapabilityError::Execution(e.to_string()))?;
            if !parent.starts_with(&self.root_dir) {
                return Err(CapabilityError::InvalidArguments(format!(
                    "path escapes sandbox: {path}"
                )));
            }
        }
        std::fs::write(&target, text)
            .map_err(|e| CapabilityError::Execution(format!("Write failed: {e}")))?;
        Ok(text.len())
    }

    pub fn list_dir(&self, path: &str) -> Result<Vec<String>, CapabilityError> {
        let base = if path.trim().is_empty() || path.trim() == "." {
            self.root_dir.clone()
        } else {
            self.resolve(path)?
        };
        let mut entries = Vec::new();
        let dir = std::fs::read_dir(&base)
            .map_err(|e| CapabilityError::Execution(format!("List failed: {e}")))?;
        for e in dir {
            let e = e.map_err(|e| CapabilityError::Execution(e.to_string()))?;
            let name = e.file_name().to_string_lossy().to_string();
            if !name.starts_with('.') {
                let ty = if e.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    "/"
                } else {
                    ""
                };
                entries.push(format!("{name}{ty}"));
            }
        }
        entries.sort();
        Ok(entries)
    }
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

/// 读取沙箱内的文本文件
pub struct ReadFileTool {
    fs: SafeFs,
}

impl ReadFileTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Capability for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file from the sandbox directory. Args: {\"path\": \"relative path\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string", "description": "Path relative to the sandbox" } },
            "required": ["path"]
        })
    }

    async fn invoke(&self, args: Value) -> Result<String, CapabilityError> {
        let path = str_arg(&args, "path")
            .ok_or_else(|| CapabilityError::InvalidArguments("Missing path".to_string()))?;
        tracing::info!(path = %path, "read_file");
        self.fs.read_file(path)
    }
}

/// 在沙箱内写入文本文件
pub struct WriteFileTool {
    fs: SafeFs,
}

impl WriteFileTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Capability for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write (overwrite) a text file in the sandbox directory. Args: {\"path\": \"relative path\", \"text\": \"content\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the sandbox" },
                "text": { "type": "string", "description": "Full file content" }
            },
            "required": ["path", "text"]
        })
    }

    async fn invoke(&self, args: Value) -> Result<String, CapabilityError> {
        let path = str_arg(&args, "path")
            .ok_or_else(|| CapabilityError::InvalidArguments("Missing path".to_string()))?;
        let text = str_arg(&args, "text")
            .ok_or_else(|| CapabilityError::InvalidArguments("Missing text".to_string()))?;
        tracing::info!(path = %path, bytes = text.len(), "write_file");
        let written = self.fs.write_file(path, text)?;
        Ok(format!("Wrote {written} bytes to {path}"))
    }
}

/// 列出沙箱目录
pub struct ListDirectoryTool {
    fs: SafeFs,
}

impl ListDirectoryTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Capability for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List a directory in the sandbox. Args: {\"path\": \"directory path, default '.'\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string", "description": "Directory relative to the sandbox" } },
            "required": []
        })
    }

    async fn invoke(&self, args: Value) -> Result<String, CapabilityError> {
        let path = str_arg(&args, "path").unwrap_or(".");
        tracing::info!(path = %path, "list_directory");
        let entries = self.fs.list_dir(path)?;
        if entries.is_empty() {
            Ok("(empty directory)".to_string())
        } else {
            Ok(entries.join("\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn write_then_read_and_list() {
        let dir = TempDir::new().unwrap();
        let write = WriteFileTool::new(dir.path());
        let read = ReadFileTool::new(dir.path());
        let list = ListDirectoryTool::new(dir.path());

        let out = write
            .invoke(json!({ "path": "notes/todo.md", "text": "buy milk" }))
            .await
            .unwrap();
        assert!(out.contains("8 bytes"));
        assert_eq!(read.invoke(json!({ "path": "notes/todo.md" })).await.unwrap(), "buy milk");
        assert_eq!(list.invoke(json!({})).await.unwrap(), "notes/");
    }

    #[tokio::test]
    async fn escapes_are_rejected() {
        let dir = TempDir::new().unwrap();
        let fs = SafeFs::new(dir.path());
        assert!(matches!(
            fs.write_file("../outside.txt", "x"),
            Err(CapabilityError::InvalidArguments(_))
        ));
        assert!(matches!(
            fs.write_file("/etc/passwd", "x"),
            Err(CapabilityError::InvalidArguments(_))
        ));
        assert!(matches!(
            fs.read_file("../../etc/passwd"),
            Err(CapabilityError::InvalidArguments(_))
        ));
    }

    #[tokio::test]
    async fn missing_arguments_are_reported() {
        let dir = TempDir::new().unwrap();
        let read = ReadFileTool::new(dir.path());
        assert!(matches!(
            read.invoke(json!({})).await,
            Err(CapabilityError::InvalidArguments(_))
        ));
    }
}
