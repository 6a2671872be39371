//! message 工具：在一轮对话中途把内容推送给用户
//!
//! 通过总线发布 OutboundMessage，目标默认是当前渠道与会话。结果对模型是 silent：
//! 内容已在带外送达，最终回复无需复述。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::bus::{MessageBus, OutboundMessage};
use crate::tools::schema::{parameters_for, parse_args, MessageArgs};
use crate::tools::{ContextualTool, Tool, ToolContext, ToolResult};

/// 工具名，编排器据此识别中途推送的内容
pub const MESSAGE_TOOL_NAME: &str = "message";

pub struct MessageTool {
    bus: Arc<MessageBus>,
}

impl MessageTool {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Tool for MessageTool {
    fn name(&self) -> &str {
        MESSAGE_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Send a message to the user right away (current chat unless channel/chat_id are given)."
    }

    fn parameters(&self) -> Value {
        parameters_for::<MessageArgs>()
    }

    async fn execute(&self, _cancel: &CancellationToken, _args: Value) -> ToolResult {
        ToolResult::error("message requires a channel context")
    }

    fn as_contextual(&self) -> Option<&dyn ContextualTool> {
        Some(self)
    }
}

#[async_trait]
impl ContextualTool for MessageTool {
    async fn execute_with_context(
        &self,
        cancel: &CancellationToken,
        ctx: &ToolContext,
        args: Value,
    ) -> ToolResult {
        let args = match parse_args::<MessageArgs>(args) {
            Ok(a) => a,
            Err(e) => return ToolResult::error(e),
        };
        if args.content.trim().is_empty() {
            return ToolResult::error("message content is empty");
        }
        let channel = args.channel.unwrap_or_else(|| ctx.channel.clone());
        let chat_id = args.chat_id.unwrap_or_else(|| ctx.chat_id.clone());
        let mut out = OutboundMessage::new(&channel, &chat_id, args.content);
        out.attachments = args.attachments;

        match self.bus.publish_outbound(cancel, out).await {
            Ok(()) => ToolResult::silent(format!("Message sent to {channel}:{chat_id}")),
            Err(e) => ToolResult::error(format!("message not sent: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_message_publishes_to_context_chat() {
        let bus = Arc::new(MessageBus::new(4));
        let tool = MessageTool::new(Arc::clone(&bus));
        let cancel = CancellationToken::new();
        let ctx = ToolContext::new("telegram", "42", "/tmp");

        let r = tool
            .execute_with_context(&cancel, &ctx, serde_json::json!({"content": "working on it"}))
            .await;
        assert!(r.silent);
        assert!(!r.is_error);

        let out = bus.subscribe_outbound(&cancel).await.unwrap();
        assert_eq!(out.channel, "telegram");
        assert_eq!(out.chat_id, "42");
        assert_eq!(out.content, "working on it");
    }

    #[tokio::test]
    async fn test_message_on_closed_bus_is_error() {
        let bus = Arc::new(MessageBus::new(4));
        bus.close();
        let tool = MessageTool::new(Arc::clone(&bus));
        let ctx = ToolContext::new("cli", "1", "/tmp");
        let r = tool
            .execute_with_context(&CancellationToken::new(), &ctx, serde_json::json!({"content": "x"}))
            .await;
        assert!(r.is_error);
    }
}
