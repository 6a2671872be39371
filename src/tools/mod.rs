//! 工具箱：Tool 契约、注册表、带超时的执行器与内置工具（message / read_file / list_dir / echo）

pub mod echo;
pub mod executor;
pub mod filesystem;
pub mod message;
pub mod registry;
pub mod schema;

use std::sync::Arc;

use crate::bus::MessageBus;

pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use filesystem::{ListDirTool, ReadFileTool, SafeFs};
pub use message::{MessageTool, MESSAGE_TOOL_NAME};
pub use registry::{ContextualTool, Tool, ToolContext, ToolRegistry, ToolResult};

/// 注册全部内置工具
pub fn builtin_registry(bus: Arc<MessageBus>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(MessageTool::new(bus));
    registry.register(ReadFileTool);
    registry.register(ListDirTool);
    registry.register(EchoTool);
    registry
}
