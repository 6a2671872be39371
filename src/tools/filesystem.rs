//! 沙箱文件系统工具
//!
//! SafeFs 绑定工作区根目录，所有路径经 resolve 校验必须在根下（禁止 ../ 逃逸）；
//! ReadFileTool / ListDirTool 为上下文工具，每次调用使用路由解析出的工作区作为根。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::{GatewayError, Result};
use crate::tools::schema::{parameters_for, parse_args, ListDirArgs, ReadFileArgs};
use crate::tools::{ContextualTool, Tool, ToolContext, ToolResult};

/// read_file 返回内容的字符上限
const MAX_READ_CHARS: usize = 16_000;

/// 沙箱文件系统：绑定根目录，resolve 校验路径在根下
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

    /// 解析并校验路径在沙箱内
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let path = path.trim_start_matches("./");
        let full = self.root_dir.join(path);
        let canonical = full
            .canonicalize()
            .map_err(|_| GatewayError::InvalidArgument(format!("path not found: {path}")))?;
        if canonical.starts_with(&self.root_dir) {
            Ok(canonical)
        } else {
            Err(GatewayError::InvalidArgument(format!(
                "path escapes workspace: {path}"
            )))
        }
    }

    pub fn read_file(&self, path: &str) -> Result<String> {
        let resolved = self.resolve(path)?;
        if !resolved.is_file() {
            return Err(GatewayError::InvalidArgument(format!("not a file: {path}")));
        }
        Ok(std::fs::read_to_string(&resolved)?)
    }

    /// 列目录：隐藏文件跳过，目录名带 '/' 后缀，排序
    pub fn list_dir(&self, path: &str) -> Result<Vec<String>> {
        let base = if path.is_empty() || path == "." {
            self.root_dir.clone()
        } else {
            self.resolve(path)?
        };
        let mut entries = Vec::new();
        for e in std::fs::read_dir(&base)? {
            let e = e?;
            let name = e.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let suffix = if e.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                "/"
            } else {
                ""
            };
            entries.push(format!("{name}{suffix}"));
        }
        entries.sort();
        Ok(entries)
    }
}

/// 在阻塞线程池上执行 SafeFs 操作，避免同步文件 IO 占住 runtime 工作线程
async fn with_fs<T, F>(workspace: &Path, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&SafeFs) -> Result<T> + Send + 'static,
{
    let workspace = workspace.to_path_buf();
    tokio::task::spawn_blocking(move || op(&SafeFs::new(workspace)))
        .await
        .map_err(|e| GatewayError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

fn cap_output(text: String) -> String {
    if text.chars().count() <= MAX_READ_CHARS {
        return text;
    }
    let head: String = text.chars().take(MAX_READ_CHARS).collect();
    format!("{head}\n...[truncated]")
}

/// read_file：读取工作区内文件
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file inside the current workspace."
    }

    fn parameters(&self) -> Value {
        parameters_for::<ReadFileArgs>()
    }

    async fn execute(&self, _cancel: &CancellationToken, _args: Value) -> ToolResult {
        ToolResult::error("read_file requires a workspace context")
    }

    fn as_contextual(&self) -> Option<&dyn ContextualTool> {
        Some(self)
    }
}

#[async_trait]
impl ContextualTool for ReadFileTool {
    async fn execute_with_context(
        &self,
        _cancel: &CancellationToken,
        ctx: &ToolContext,
        args: Value,
    ) -> ToolResult {
        let args = match parse_args::<ReadFileArgs>(args) {
            Ok(a) => a,
            Err(e) => return ToolResult::error(e),
        };
        tracing::debug!(path = %args.path, workspace = %ctx.workspace.display(), "read_file");
        let path = args.path;
        match with_fs(&ctx.workspace, move |fs| fs.read_file(&path)).await {
            Ok(text) => ToolResult::ok(cap_output(text)),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}

/// list_dir：列出工作区内目录
pub struct ListDirTool;

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List a directory inside the current workspace (default: workspace root)."
    }

    fn parameters(&self) -> Value {
        parameters_for::<ListDirArgs>()
    }

    async fn execute(&self, _cancel: &CancellationToken, _args: Value) -> ToolResult {
        ToolResult::error("list_dir requires a workspace context")
    }

    fn as_contextual(&self) -> Option<&dyn ContextualTool> {
        Some(self)
    }
}

#[async_trait]
impl ContextualTool for ListDirTool {
    async fn execute_with_context(
        &self,
        _cancel: &CancellationToken,
        ctx: &ToolContext,
        args: Value,
    ) -> ToolResult {
        let args = match parse_args::<ListDirArgs>(args) {
            Ok(a) => a,
            Err(e) => return ToolResult::error(e),
        };
        let path = args.path.unwrap_or_default();
        tracing::debug!(path = %path, workspace = %ctx.workspace.display(), "list_dir");
        match with_fs(&ctx.workspace, move |fs| fs.list_dir(&path)).await {
            Ok(entries) if entries.is_empty() => ToolResult::ok("(empty directory)"),
            Ok(entries) => ToolResult::ok(entries.join("\n")),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ctx(dir: &Path) -> ToolContext {
        ToolContext::new("cli", "1", dir)
    }

    #[test]
    fn test_safe_fs_rejects_escape() {
        let outer = TempDir::new().unwrap();
        let ws = outer.path().join("ws");
        std::fs::create_dir_all(&ws).unwrap();
        std::fs::write(outer.path().join("secret.txt"), "s").unwrap();

        let fs = SafeFs::new(&ws);
        let err = fs.read_file("../secret.txt").unwrap_err();
        assert!(err.to_string().contains("escapes workspace"));
    }

    #[tokio::test]
    async fn test_read_and_list_with_context() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.md"), "hello notes").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join(".hidden"), "x").unwrap();
        let cancel = CancellationToken::new();

        let read = ReadFileTool
            .execute_with_context(&cancel, &ctx(dir.path()), serde_json::json!({"path": "notes.md"}))
            .await;
        assert!(!read.is_error);
        assert_eq!(read.for_llm, "hello notes");

        let list = ListDirTool
            .execute_with_context(&cancel, &ctx(dir.path()), Value::Null)
            .await;
        assert_eq!(list.for_llm, "notes.md\nsub/");
    }

    #[tokio::test]
    async fn test_tool_errors_surface_from_blocking_pool() {
        let outer = TempDir::new().unwrap();
        let ws = outer.path().join("ws");
        std::fs::create_dir_all(&ws).unwrap();
        std::fs::write(outer.path().join("secret.txt"), "s").unwrap();
        let cancel = CancellationToken::new();

        let escaped = ReadFileTool
            .execute_with_context(&cancel, &ctx(&ws), serde_json::json!({"path": "../secret.txt"}))
            .await;
        assert!(escaped.is_error);
        assert!(escaped.for_llm.contains("escapes workspace"));

        let missing = ListDirTool
            .execute_with_context(&cancel, &ctx(&ws), serde_json::json!({"path": "nope"}))
            .await;
        assert!(missing.is_error);
        let empty = ListDirTool.execute_with_context(&cancel, &ctx(&ws), Value::Null).await;
        assert_eq!(empty.for_llm, "(empty directory)");
    }

    #[tokio::test]
    async fn test_without_context_is_error() {
        let cancel = CancellationToken::new();
        let r = ReadFileTool.execute(&cancel, serde_json::json!({"path": "x"})).await;
        assert!(r.is_error);
        assert!(ReadFileTool.as_contextual().is_some());
    }
}
