//! Hive - 个人助理网关核心
//!
//! 模块划分：
//! - **bus**: 入站 / 出站消息总线（有界、可关闭、可取消）
//! - **session**: 会话存储（原子持久化、后台预加载）与路由解析
//! - **archive**: 会话裁剪归档与词法回忆
//! - **agent**: 单轮编排（模型 + 工具循环）、上下文构建、兜底意图、钩子、总线消费循环
//! - **llm**: Provider 契约与 Mock 实现
//! - **tools**: Tool 契约、注册表、执行器与内置工具
//! - **skills**: 工作区技能发现
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与优雅关闭
//! - **observability**: 日志初始化

pub mod agent;
pub mod archive;
pub mod bus;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod session;
pub mod skills;
pub mod tools;

pub use agent::{AgentRunner, TurnOrchestrator};
pub use bus::{InboundMessage, MessageBus, OutboundMessage};
pub use config::{load_config, AppConfig};
pub use core::{GatewayError, Result};
pub use session::{RoutingResolver, SessionStore};
