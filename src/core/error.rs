//! 网关错误类型
//!
//! - GatewayError：流水线通用错误（参数、配置、I/O、Provider、迭代上限等）
//! - BusError：消息总线的「已关闭」与「已取消」，与普通背压严格区分
//! - RoutingError：路由配置校验失败（构造期即失败，不静默忽略）

use std::path::PathBuf;

use thiserror::Error;

/// 网关流水线错误
#[derive(Error, Debug)]
pub enum GatewayError {
    /// 同步参数错误（如会话键不满足文件名安全要求）
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Provider error: {0}")]
    Provider(String),

    /// 单轮工具调用次数超过上限，整轮中止
    #[error("Max tool iterations exceeded ({0})")]
    MaxIterations(usize),

    #[error("Cancelled")]
    Cancelled,

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Routing(#[from] RoutingError),
}

/// 消息总线错误：关闭与取消是两种不同的信号
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    #[error("message bus closed")]
    Closed,

    #[error("bus operation cancelled")]
    Cancelled,
}

/// 路由配置错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("duplicate mapping for {channel}:{chat_id}")]
    DuplicateMapping { channel: String, chat_id: String },

    #[error("workspace does not exist: {0}")]
    WorkspaceMissing(PathBuf),

    #[error("workspace is not a directory: {0}")]
    WorkspaceNotDir(PathBuf),

    #[error("mapping {channel}:{chat_id} has no allowed senders")]
    EmptyAllowedSenders { channel: String, chat_id: String },

    #[error("mapping field `{0}` must not be empty")]
    EmptyField(&'static str),
}

pub type Result<T, E = GatewayError> = std::result::Result<T, E>;
