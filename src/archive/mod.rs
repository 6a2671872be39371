//! 会话归档与回忆
//!
//! - **trim**: 裁剪边界、token 估算、归档 Markdown 渲染
//! - **engine**: 按阈值归档会话，写时间戳文件并更新状态文档
//! - **state**: 工作区级 archive_state.json
//! - **recall**: 归档文件的词法检索
//! - **tokenizer**: 检索词切分（中文走 jieba）

pub mod engine;
pub mod recall;
pub mod state;
pub mod tokenizer;
pub mod trim;

pub use engine::{ArchiveEngine, ArchiveOptions, ArchiveResult};
pub use recall::{render_hits, RecallHit, RecallRequest};
pub use state::{ArchiveState, SessionArchiveEntry};
