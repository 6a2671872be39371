//! 工具执行器
//!
//! 持有 ToolRegistry 与单次调用超时；execute 查找工具、按需绑定渠道上下文，在超时内执行。
//! 未知工具、超时、取消都转为 is_error 的 ToolResult，不中断整轮对话；每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::llm::ToolDefinition;
use crate::tools::{Tool, ToolContext, ToolRegistry, ToolResult};

/// 工具执行器：对每次调用施加超时
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self::with_timeout(registry, Duration::from_secs(timeout_secs))
    }

    pub fn with_timeout(registry: ToolRegistry, timeout: Duration) -> Self {
        Self {
            registry: Arc::new(registry),
            timeout,
        }
    }

    /// 执行指定工具；上下文工具使用 ctx，其余工具不会看到上下文
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        ctx: &ToolContext,
        tool_name: &str,
        args: Value,
    ) -> ToolResult {
        let Some(tool) = self.registry.get(tool_name) else {
            tracing::warn!(tool = %tool_name, "unknown tool requested");
            return ToolResult::error(format!(
                "Unknown tool: {tool_name}. Available tools: {}",
                self.registry.tool_names().join(", ")
            ));
        };

        let start = Instant::now();
        let preview = args_preview(&args);
        let run = run_tool(tool.as_ref(), cancel, ctx, args);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            r = timeout(self.timeout, run) => Some(r),
        };

        let (outcome, tool_result) = match result {
            None => ("cancelled", ToolResult::error(format!("{tool_name} cancelled"))),
            Some(Err(_)) => (
                "timeout",
                ToolResult::error(format!(
                    "{tool_name} timed out after {}s",
                    self.timeout.as_secs_f32()
                )),
            ),
            Some(Ok(r)) if r.is_error => ("error", r),
            Some(Ok(r)) => ("ok", r),
        };

        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": !tool_result.is_error,
            "outcome": outcome,
            "contextual": tool.as_contextual().is_some(),
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");
        tool_result
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }
}

async fn run_tool(
    tool: &dyn Tool,
    cancel: &CancellationToken,
    ctx: &ToolContext,
    args: Value,
) -> ToolResult {
    match tool.as_contextual() {
        Some(contextual) => contextual.execute_with_context(cancel, ctx, args).await,
        None => tool.execute(cancel, args).await,
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::tools::EchoTool;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        async fn execute(&self, _cancel: &CancellationToken, _args: Value) -> ToolResult {
            tokio::time::sleep(Duration::from_secs(5)).await;
            ToolResult::ok("late")
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register(SlowTool);
        ToolExecutor::with_timeout(registry, Duration::from_millis(50))
    }

    fn ctx() -> ToolContext {
        ToolContext::new("cli", "1", "/tmp")
    }

    #[tokio::test]
    async fn test_execute_echo() {
        let cancel = CancellationToken::new();
        let r = executor()
            .execute(&cancel, &ctx(), "echo", serde_json::json!({"text": "hi"}))
            .await;
        assert_eq!(r, ToolResult::ok("hi"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_result() {
        let cancel = CancellationToken::new();
        let r = executor().execute(&cancel, &ctx(), "nope", Value::Null).await;
        assert!(r.is_error);
        assert!(r.for_llm.contains("Unknown tool: nope"));
        assert!(r.for_llm.contains("echo"));
    }

    #[tokio::test]
    async fn test_timeout_and_cancel() {
        let cancel = CancellationToken::new();
        let r = executor().execute(&cancel, &ctx(), "slow", Value::Null).await;
        assert!(r.is_error);
        assert!(r.for_llm.contains("timed out"));

        cancel.cancel();
        let r = executor().execute(&cancel, &ctx(), "slow", Value::Null).await;
        assert!(r.for_llm.contains("cancelled"));
    }
}
