//! Echo 工具（诊断用）

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::tools::schema::{parameters_for, parse_args, EchoArgs};
use crate::tools::{Tool, ToolResult};

/// Echo 工具：回显文本
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo text back (diagnostics)."
    }

    fn parameters(&self) -> Value {
        parameters_for::<EchoArgs>()
    }

    async fn execute(&self, _cancel: &CancellationToken, args: Value) -> ToolResult {
        match parse_args::<EchoArgs>(args) {
            Ok(a) => ToolResult::ok(a.text),
            Err(e) => ToolResult::error(e),
        }
    }
}
