//! LLM 层：Provider 契约与 Mock 实现

pub mod mock;
pub mod traits;

pub use mock::{MockProvider, RecordedRequest};
pub use traits::{ChatOptions, ChatResponse, Provider, ToolDefinition, Usage};
