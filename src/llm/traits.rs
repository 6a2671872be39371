//! Provider 抽象
//!
//! 所有模型后端实现 Provider：chat（带工具定义的一次补全）与 default_model。
//! 具体的线协议不在本 crate 内；后端只需满足该契约。

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::Result;
use crate::session::{Message, ToolCall};

/// 提供给模型的工具定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema
    pub parameters: Value,
}

/// token 使用统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// 一次 chat 的返回
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub finish_reason: String,
    #[serde(default)]
    pub usage: Usage,
}

impl ChatResponse {
    /// 纯文本回复
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finish_reason: "stop".to_string(),
            ..Self::default()
        }
    }

    /// 带工具调用的回复
    pub fn with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
            finish_reason: "tool_calls".to_string(),
            ..Self::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// 可识别的 chat 选项；未设置的项不传给后端
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub reasoning_effort: Option<String>,
}

impl ChatOptions {
    /// 展开为选项表（max_tokens / temperature / reasoning_effort）
    pub fn to_map(&self) -> HashMap<String, Value> {
        let mut map = HashMap::new();
        if let Some(v) = self.max_tokens {
            map.insert("max_tokens".to_string(), Value::from(v));
        }
        if let Some(v) = self.temperature {
            map.insert("temperature".to_string(), Value::from(v));
        }
        if let Some(v) = &self.reasoning_effort {
            map.insert("reasoning_effort".to_string(), Value::from(v.clone()));
        }
        map
    }
}

/// 模型后端契约
#[async_trait]
pub trait Provider: Send + Sync {
    /// 一次补全；后端应在 cancel 触发时尽快返回 GatewayError::Cancelled
    async fn chat(
        &self,
        cancel: &CancellationToken,
        messages: &[Message],
        tools: &[ToolDefinition],
        model: &str,
        options: &HashMap<String, Value>,
    ) -> Result<ChatResponse>;

    fn default_model(&self) -> &str;
}
