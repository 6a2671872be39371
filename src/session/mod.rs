//! 会话层：消息模型、会话存储（原子持久化）、路由解析

mod atomic;
pub mod message;
pub mod resolver;
pub mod store;

pub(crate) use atomic::write_atomic;
pub use message::{Message, Role, ToolCall};
pub use resolver::{
    reply_target, workspace_hash, RoutingConfig, RoutingDecision, RoutingEvent, RoutingMapping, RoutingResolver,
    UnmappedBehavior, SYSTEM_CHANNEL,
};
pub use store::{validate_session_key, Session, SessionStore};
