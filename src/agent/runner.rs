//! 总线消费循环
//!
//! 逐条取入站消息：路由 -> 编排一轮 -> 发布出站回复。一条消息处理完毕才取下一条，
//! 同一消费者内天然串行。被拒绝的消息不回复；模型失败时回复一条用户可见的失败提示。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::turn::TurnOrchestrator;
use crate::bus::{InboundMessage, MessageBus, OutboundMessage};
use crate::core::{BusError, GatewayError};
use crate::session::{reply_target, RoutingResolver};

/// 模型或工具循环失败时发给用户的提示
pub const FAILURE_REPLY: &str = "Sorry, I couldn't process your message right now. Please try again.";

pub struct AgentRunner {
    bus: Arc<MessageBus>,
    resolver: RoutingResolver,
    orchestrator: Arc<TurnOrchestrator>,
}

impl AgentRunner {
    pub fn new(bus: Arc<MessageBus>, resolver: RoutingResolver, orchestrator: Arc<TurnOrchestrator>) -> Self {
        Self {
            bus,
            resolver,
            orchestrator,
        }
    }

    /// 运行直到总线关闭或取消
    pub async fn run(&self, cancel: &CancellationToken) {
        tracing::info!("agent runner started");
        loop {
            let msg = match self.bus.consume_inbound(cancel).await {
                Ok(m) => m,
                Err(BusError::Closed) => {
                    tracing::info!("bus closed, runner exiting");
                    break;
                }
                Err(BusError::Cancelled) => {
                    tracing::info!("runner cancelled");
                    break;
                }
            };
            if let Err(e) = self.handle(cancel, msg).await {
                tracing::info!(error = %e, "runner stopping");
                break;
            }
        }
    }

    /// 处理一条入站消息；只有总线错误会向上返回
    pub async fn handle(&self, cancel: &CancellationToken, msg: InboundMessage) -> Result<(), BusError> {
        let decision = self.resolver.resolve(&msg);
        if !decision.allowed {
            tracing::info!(
                channel = %msg.channel,
                chat_id = %msg.chat_id,
                sender = %msg.sender_id,
                event = %decision.event,
                reason = %decision.reason,
                "message not routed"
            );
            return Ok(());
        }
        tracing::debug!(session = %decision.session_key, event = %decision.event, "message routed");

        let (channel, chat_id) = reply_target(&msg);
        match self.orchestrator.process(cancel, &msg, &decision).await {
            Ok(outcome) => {
                for note in outcome.user_notes {
                    self.publish(cancel, OutboundMessage::new(&channel, &chat_id, note)).await?;
                }
                if !outcome.delivered_out_of_band && !outcome.reply.trim().is_empty() {
                    self.publish(cancel, OutboundMessage::new(&channel, &chat_id, outcome.reply))
                        .await?;
                }
                Ok(())
            }
            Err(GatewayError::Cancelled) => Err(BusError::Cancelled),
            Err(e) => {
                tracing::error!(session = %decision.session_key, error = %e, "turn failed");
                self.publish(cancel, OutboundMessage::new(&channel, &chat_id, FAILURE_REPLY))
                    .await
            }
        }
    }

    async fn publish(&self, cancel: &CancellationToken, out: OutboundMessage) -> Result<(), BusError> {
        self.bus.publish_outbound(cancel, out).await
    }
}
