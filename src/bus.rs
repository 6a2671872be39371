//! 进程内消息总线
//!
//! 两条有界队列：inbound（渠道监听 -> 对话处理）与 outbound（对话处理 -> 渠道发送）。
//! 每个操作都接受取消令牌；总线关闭或令牌取消后立即失败而不是阻塞，
//! 关闭（BusError::Closed）与取消（BusError::Cancelled）是两种不同的信号，不会与背压混淆。
//! close() 幂等，关闭后不再投递任何消息。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::core::BusError;

/// 默认队列容量
pub const DEFAULT_BUS_CAPACITY: usize = 100;

/// 渠道适配器产生的入站消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub sender_id: String,
    pub content: String,
    /// 渠道附加信息（如 is_mention、is_dm）
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl InboundMessage {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        sender_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            sender_id: sender_id.into(),
            content: content.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 读取布尔型元数据；兼容 "true" / "1" 字符串与数字
    pub fn flag(&self, key: &str) -> bool {
        match self.metadata.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
            Some(Value::Number(n)) => n.as_i64().map_or(false, |v| v != 0),
            _ => false,
        }
    }
}

/// 发往渠道适配器的出站消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<String>,
}

impl OutboundMessage {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            attachments: Vec::new(),
        }
    }
}

/// 消息总线
pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Mutex<mpsc::Receiver<InboundMessage>>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    outbound_rx: Mutex<mpsc::Receiver<OutboundMessage>>,
    closed: CancellationToken,
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        Self {
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            outbound_tx,
            outbound_rx: Mutex::new(outbound_rx),
            closed: CancellationToken::new(),
        }
    }

    pub async fn publish_inbound(
        &self,
        cancel: &CancellationToken,
        msg: InboundMessage,
    ) -> Result<(), BusError> {
        self.send(&self.inbound_tx, cancel, msg).await
    }

    pub async fn consume_inbound(
        &self,
        cancel: &CancellationToken,
    ) -> Result<InboundMessage, BusError> {
        self.recv(&self.inbound_rx, cancel).await
    }

    pub async fn publish_outbound(
        &self,
        cancel: &CancellationToken,
        msg: OutboundMessage,
    ) -> Result<(), BusError> {
        self.send(&self.outbound_tx, cancel, msg).await
    }

    pub async fn subscribe_outbound(
        &self,
        cancel: &CancellationToken,
    ) -> Result<OutboundMessage, BusError> {
        self.recv(&self.outbound_rx, cancel).await
    }

    /// 关闭总线：立即唤醒所有挂起的收发操作，返回 BusError::Closed
    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            tracing::info!("message bus closed");
        }
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn check(&self, cancel: &CancellationToken) -> Result<(), BusError> {
        if self.closed.is_cancelled() {
            return Err(BusError::Closed);
        }
        if cancel.is_cancelled() {
            return Err(BusError::Cancelled);
        }
        Ok(())
    }

    async fn send<T>(
        &self,
        tx: &mpsc::Sender<T>,
        cancel: &CancellationToken,
        msg: T,
    ) -> Result<(), BusError> {
        self.check(cancel)?;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(BusError::Closed),
            _ = cancel.cancelled() => Err(BusError::Cancelled),
            sent = tx.send(msg) => sent.map_err(|_| BusError::Closed),
        }
    }

    async fn recv<T>(
        &self,
        rx: &Mutex<mpsc::Receiver<T>>,
        cancel: &CancellationToken,
    ) -> Result<T, BusError> {
        self.check(cancel)?;
        let received = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(BusError::Closed),
            _ = cancel.cancelled() => return Err(BusError::Cancelled),
            msg = async { rx.lock().await.recv().await } => msg,
        };
        // 与 close 竞争时以关闭为准
        if self.closed.is_cancelled() {
            return Err(BusError::Closed);
        }
        received.ok_or(BusError::Closed)
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}
