//! 核心层：错误类型与优雅关闭

pub mod error;
pub mod shutdown;

pub use error::{BusError, GatewayError, Result, RoutingError};
pub use shutdown::{SessionFlush, ShutdownManager, ShutdownReason, ShutdownReport, ShutdownSequence, ShutdownTask};
