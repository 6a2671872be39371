//! Mock Provider（用于测试与本地运行，无需 API）
//!
//! 按顺序返回预置的 ChatResponse；脚本用完后回显最后一条用户消息。
//! 每次请求都会被记录，便于断言上下文内容。

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::{GatewayError, Result};
use crate::llm::{ChatResponse, Provider, ToolDefinition};
use crate::session::{Message, Role};

/// 一次被记录的请求
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub model: String,
    pub options: HashMap<String, Value>,
}

/// 脚本项：正常回复或失败
#[derive(Debug, Clone)]
enum Scripted {
    Reply(ChatResponse),
    Fail(String),
}

/// 脚本化 Mock Provider
#[derive(Debug, Default)]
pub struct MockProvider {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以一组预置回复创建
    pub fn scripted(responses: impl IntoIterator<Item = ChatResponse>) -> Self {
        let provider = Self::new();
        for r in responses {
            provider.push(r);
        }
        provider
    }

    pub fn push(&self, response: ChatResponse) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Scripted::Reply(response));
        }
    }

    /// 下一次调用返回 Provider 错误
    pub fn push_error(&self, message: impl Into<String>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Scripted::Fail(message.into()));
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn chat(
        &self,
        cancel: &CancellationToken,
        messages: &[Message],
        tools: &[ToolDefinition],
        model: &str,
        options: &HashMap<String, Value>,
    ) -> Result<ChatResponse> {
        if cancel.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(RecordedRequest {
                messages: messages.to_vec(),
                tools: tools.to_vec(),
                model: model.to_string(),
                options: options.clone(),
            });
        }

        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(Scripted::Reply(r)) => Ok(r),
            Some(Scripted::Fail(e)) => Err(GatewayError::Provider(e)),
            None => {
                let last_user = messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.as_str())
                    .unwrap_or("(no input)");
                Ok(ChatResponse::text(format!("Echo: {last_user}")))
            }
        }
    }

    fn default_model(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ToolCall;

    #[tokio::test]
    async fn test_script_then_echo() {
        let provider = MockProvider::scripted([ChatResponse::with_tool_calls(
            "",
            vec![ToolCall::new("c1", "echo", serde_json::json!({"text": "hi"}))],
        )]);
        let cancel = CancellationToken::new();
        let msgs = vec![Message::user("hello")];

        let first = provider.chat(&cancel, &msgs, &[], "mock", &HashMap::new()).await.unwrap();
        assert!(first.has_tool_calls());
        let second = provider.chat(&cancel, &msgs, &[], "mock", &HashMap::new()).await.unwrap();
        assert_eq!(second.content, "Echo: hello");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_and_error() {
        let provider = MockProvider::new();
        provider.push_error("boom");
        let cancel = CancellationToken::new();
        let err = provider.chat(&cancel, &[], &[], "mock", &HashMap::new()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Provider(_)));

        cancel.cancel();
        let err = provider.chat(&cancel, &[], &[], "mock", &HashMap::new()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Cancelled));
    }
}
