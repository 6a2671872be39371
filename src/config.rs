//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__AGENT__MODEL=gpt-4o`）。
//! 配置值在构造时显式传入各组件，流水线内部不读取任何全局状态。

use std::path::PathBuf;

use serde::Deserialize;

use crate::session::RoutingConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub agent: AgentSection,
    pub session: SessionSection,
    pub archive: ArchiveSection,
    pub routing: RoutingConfig,
    pub hooks: HooksSection,
    pub bus: BusSection,
}

/// [app] 段：存储目录、默认工作区、全局工作区、系统提示词
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// 会话 JSON 存放目录
    pub storage_dir: PathBuf,
    /// 未映射聊天回退到的工作区
    pub default_workspace: PathBuf,
    /// 引导文档回退来源（工作区缺少 AGENTS.md 等文件时使用）
    pub global_workspace: Option<PathBuf>,
    pub system_prompt: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "hive".to_string(),
            storage_dir: PathBuf::from("data/sessions"),
            default_workspace: PathBuf::from("workspace"),
            global_workspace: None,
            system_prompt: "You are a helpful personal assistant.".to_string(),
        }
    }
}

/// [agent] 段：模型与工具循环
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// 为空时使用 Provider 的默认模型
    pub model: Option<String>,
    pub max_tool_iterations: usize,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub reasoning_effort: Option<String>,
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    /// 是否启用确定性兜底意图
    pub fallback_enabled: bool,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            model: None,
            max_tool_iterations: 20,
            max_tokens: None,
            temperature: None,
            reasoning_effort: None,
            tool_timeout_secs: 30,
            fallback_enabled: true,
        }
    }
}

/// [session] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// 启动预加载最长等待（毫秒）
    pub preload_timeout_ms: u64,
    /// save 耗时告警阈值（毫秒）
    pub save_warn_ms: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            preload_timeout_ms: 750,
            save_warn_ms: 200,
        }
    }
}

/// [archive] 段：会话裁剪归档与回忆
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArchiveSection {
    pub enabled: bool,
    /// 启用归档/回忆的渠道；为空表示全部渠道
    pub channels: Vec<String>,
    pub max_session_messages: usize,
    pub max_session_tokens: usize,
    /// 裁剪后保留的最近用户轮数
    pub keep_user_pairs: usize,
    /// 裁剪后至少保留的消息条数
    pub min_tail_messages: usize,
    /// 单条消息写入归档的字符上限
    pub max_message_chars: usize,
    pub recall_enabled: bool,
    pub recall_top_k: usize,
    /// 自动注入的回忆段落字符预算
    pub recall_max_chars: usize,
    /// 单条命中片段字符上限
    pub snippet_chars: usize,
}

impl Default for ArchiveSection {
    fn default() -> Self {
        Self {
            enabled: true,
            channels: Vec::new(),
            max_session_messages: 40,
            max_session_tokens: 12_000,
            keep_user_pairs: 4,
            min_tail_messages: 4,
            max_message_chars: 2_000,
            recall_enabled: true,
            recall_top_k: 3,
            recall_max_chars: 1_500,
            snippet_chars: 400,
        }
    }
}

impl ArchiveSection {
    /// 该渠道是否启用归档
    pub fn channel_enabled(&self, channel: &str) -> bool {
        self.enabled
            && (self.channels.is_empty()
                || self.channels.iter().any(|c| c.eq_ignore_ascii_case(channel)))
    }
}

/// [hooks] 段：生命周期钩子审计日志
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HooksSection {
    pub enabled: bool,
    /// 相对工作区的审计文件路径
    pub audit_file: PathBuf,
}

impl Default for HooksSection {
    fn default() -> Self {
        Self {
            enabled: false,
            audit_file: PathBuf::from("memory/hooks.jsonl"),
        }
    }
}

/// [bus] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusSection {
    pub capacity: usize,
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            capacity: crate::bus::DEFAULT_BUS_CAPACITY,
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::UnmappedBehavior;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.max_tool_iterations, 20);
        assert_eq!(cfg.session.preload_timeout_ms, 750);
        assert_eq!(cfg.bus.capacity, 100);
        assert!(cfg.archive.channel_enabled("telegram"));
        assert!(!cfg.routing.enabled);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("hive.toml");
        std::fs::write(
            &path,
            r#"
[agent]
max_tool_iterations = 5

[archive]
channels = ["telegram"]
max_session_messages = 8

[routing]
enabled = true
unmapped_behavior = "block"

[[routing.mappings]]
channel = "slack"
chat_id = "C1"
workspace = "/tmp"
allowed_senders = ["alice"]
require_mention = false
"#,
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.agent.max_tool_iterations, 5);
        assert_eq!(cfg.archive.max_session_messages, 8);
        assert_eq!(cfg.archive.keep_user_pairs, 4);
        assert!(cfg.archive.channel_enabled("Telegram"));
        assert!(!cfg.archive.channel_enabled("slack"));
        assert_eq!(cfg.routing.unmapped_behavior, UnmappedBehavior::Block);
        assert_eq!(cfg.routing.mappings.len(), 1);
        assert_eq!(cfg.routing.mappings[0].require_mention, Some(false));
    }
}
