//! Agent：单轮编排、上下文构建、兜底意图、生命周期钩子与总线消费循环

pub mod context;
pub mod fallback;
pub mod hooks;
pub mod runner;
pub mod turn;

pub use context::{ContextBuilder, ContextInput, BOOTSTRAP_FILES};
pub use fallback::{match_intent, FallbackIntent};
pub use hooks::{AuditLogHook, TurnEvent, TurnHook};
pub use runner::{AgentRunner, FAILURE_REPLY};
pub use turn::{is_placeholder_reply, TurnOrchestrator, TurnOutcome};
