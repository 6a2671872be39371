//! 上下文构建
//!
//! system prompt = 身份提示 + 当前会话信息 + 工作区引导文档（缺失时回退全局工作区）
//! + 技能摘要 + 记忆（memory/MEMORY.md）+ 可选的回忆段落；
//! 其后是历史消息（去掉开头孤立的 tool 消息）与本轮用户消息。

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::session::{Message, Role};
use crate::skills::SkillLoader;

/// 按顺序注入的引导文档
pub const BOOTSTRAP_FILES: [&str; 4] = ["AGENTS.md", "SOUL.md", "USER.md", "IDENTITY.md"];

/// 单轮上下文输入
#[derive(Debug, Clone)]
pub struct ContextInput<'a> {
    pub channel: &'a str,
    pub chat_id: &'a str,
    pub workspace: &'a Path,
    pub history: &'a [Message],
    pub user_message: &'a str,
    /// 已渲染的回忆段落
    pub recall: Option<String>,
}

pub struct ContextBuilder {
    system_prompt: String,
    global_workspace: Option<PathBuf>,
}

impl ContextBuilder {
    pub fn new(system_prompt: impl Into<String>, global_workspace: Option<PathBuf>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            global_workspace,
        }
    }

    /// 读取引导文档：工作区优先，否则全局工作区
    pub fn load_bootstrap(&self, workspace: &Path) -> Vec<(&'static str, String)> {
        BOOTSTRAP_FILES
            .iter()
            .filter_map(|name| {
                let local = read_non_empty(&workspace.join(name));
                let text = local.or_else(|| {
                    self.global_workspace
                        .as_ref()
                        .and_then(|g| read_non_empty(&g.join(name)))
                })?;
                Some((*name, text))
            })
            .collect()
    }

    pub fn build_system_prompt(&self, input: &ContextInput<'_>) -> String {
        let mut sections = vec![self.system_prompt.trim().to_string()];
        sections.push(format!(
            "## Current Session\n\nChannel: {}\nChat ID: {}\nWorkspace: {}\nTime: {}",
            input.channel,
            input.chat_id,
            input.workspace.display(),
            Utc::now().to_rfc3339()
        ));
        for (name, text) in self.load_bootstrap(input.workspace) {
            sections.push(format!("## {name}\n\n{}", text.trim()));
        }
        if let Some(skills) = SkillLoader::for_workspace(input.workspace).summary_section() {
            sections.push(skills.trim().to_string());
        }
        if let Some(memory) = read_non_empty(&input.workspace.join("memory").join("MEMORY.md")) {
            sections.push(format!("## Memory\n\n{}", memory.trim()));
        }
        if let Some(recall) = &input.recall {
            sections.push(recall.trim().to_string());
        }
        sections.join("\n\n")
    }

    /// 组装本轮发给模型的消息
    pub fn build(&self, input: &ContextInput<'_>) -> Vec<Message> {
        let history = strip_orphan_tool_messages(input.history);
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(self.build_system_prompt(input)));
        messages.extend_from_slice(history);
        messages.push(Message::user(input.user_message));
        messages
    }
}

/// 去掉历史开头的孤立 tool 消息（上次在工具调用中途崩溃留下的）
pub fn strip_orphan_tool_messages(history: &[Message]) -> &[Message] {
    let start = history
        .iter()
        .position(|m| m.role != Role::Tool)
        .unwrap_or(history.len());
    if start > 0 {
        tracing::debug!(dropped = start, "stripped orphaned tool messages from history");
    }
    &history[start..]
}

fn read_non_empty(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .filter(|s| !s.trim().is_empty())
}
