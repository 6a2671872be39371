//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters / execute），由 ToolRegistry 按名注册与查找。
//! 需要渠道上下文的工具额外实现 ContextualTool，并通过 `as_contextual` 暴露；
//! 编排器按调用检查该能力，不要求每个工具都实现。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::llm::ToolDefinition;

/// 工具执行结果；作为 tool 角色消息回灌会话，不单独持久化
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ToolResult {
    /// 回灌给模型的内容
    pub for_llm: String,
    /// 直接展示给用户的内容（可为空）
    pub for_user: String,
    /// 已在带外送达用户，模型无需再复述
    pub silent: bool,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(for_llm: impl Into<String>) -> Self {
        Self {
            for_llm: for_llm.into(),
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            for_llm: message.into(),
            is_error: true,
            ..Self::default()
        }
    }

    pub fn silent(for_llm: impl Into<String>) -> Self {
        Self {
            for_llm: for_llm.into(),
            silent: true,
            ..Self::default()
        }
    }

    /// 同时给出面向用户的内容
    pub fn user(for_llm: impl Into<String>, for_user: impl Into<String>) -> Self {
        Self {
            for_llm: for_llm.into(),
            for_user: for_user.into(),
            ..Self::default()
        }
    }
}

/// 单次调用绑定的渠道上下文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolContext {
    pub channel: String,
    pub chat_id: String,
    /// 路由解析出的工作区
    pub workspace: PathBuf,
}

impl ToolContext {
    pub fn new(channel: impl Into<String>, chat_id: impl Into<String>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            workspace: workspace.into(),
        }
    }
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 无上下文执行
    async fn execute(&self, cancel: &CancellationToken, args: Value) -> ToolResult;

    /// 若工具需要渠道上下文，返回其 ContextualTool 视图
    fn as_contextual(&self) -> Option<&dyn ContextualTool> {
        None
    }
}

/// 可选能力：带渠道上下文执行
#[async_trait]
pub trait ContextualTool: Send + Sync {
    async fn execute_with_context(
        &self,
        cancel: &CancellationToken,
        ctx: &ToolContext,
        args: Value,
    ) -> ToolResult;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具；同名覆盖
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "tool re-registered, previous definition replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// 按名称排序
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 提供给模型的工具定义（按名称排序，保证请求稳定）
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }
}
