//! 路由解析
//!
//! 由已校验的配置构造一次，之后 `resolve` 是纯函数：
//! (channel, chat_id, sender) -> RoutingDecision（工作区、会话键、是否放行）。
//!
//! 会话键 = channel:chat_id@工作区短哈希；同一聊天改指到另一个工作区会得到新的会话键，
//! 历史不会跨工作区泄漏。工作区是否存在在 resolve 时重新检查。

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::bus::InboundMessage;
use crate::core::RoutingError;

/// 内部伪渠道：异步子任务回调，chat_id 形如 "origin_channel:origin_chat_id"
pub const SYSTEM_CHANNEL: &str = "system";

/// 发送者白名单通配符
const ANY_SENDER: &str = "*";

/// 未映射聊天的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnmappedBehavior {
    /// 回退到默认工作区并放行
    #[default]
    Default,
    /// 拒绝
    Block,
}

/// 单条路由映射：(channel, chat_id) -> 工作区 + 发送者白名单
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingMapping {
    pub channel: String,
    pub chat_id: String,
    pub workspace: PathBuf,
    #[serde(default)]
    pub allowed_senders: Vec<String>,
    #[serde(default)]
    pub label: Option<String>,
    /// 未设置时默认需要 @ 提及
    #[serde(default)]
    pub require_mention: Option<bool>,
}

/// [routing] 段
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub unmapped_behavior: UnmappedBehavior,
    #[serde(default)]
    pub mappings: Vec<RoutingMapping>,
}

/// 路由事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingEvent {
    Match,
    Unmapped,
    Deny,
    MentionSkip,
    Invalid,
}

impl std::fmt::Display for RoutingEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutingEvent::Match => write!(f, "match"),
            RoutingEvent::Unmapped => write!(f, "unmapped"),
            RoutingEvent::Deny => write!(f, "deny"),
            RoutingEvent::MentionSkip => write!(f, "mention_skip"),
            RoutingEvent::Invalid => write!(f, "invalid"),
        }
    }
}

/// 路由结果（纯输出，不持久化）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub event: RoutingEvent,
    pub allowed: bool,
    pub workspace: PathBuf,
    pub session_key: String,
    pub reason: String,
    pub mapping_label: Option<String>,
}

#[derive(Debug, Clone)]
struct ResolvedMapping {
    workspace: PathBuf,
    allowed_senders: HashSet<String>,
    label: Option<String>,
    require_mention: bool,
}

/// 工作区路径的短哈希（8 位十六进制）
pub fn workspace_hash(workspace: &Path) -> String {
    let digest = Sha256::digest(workspace.to_string_lossy().as_bytes());
    digest[..4].iter().map(|b| format!("{b:02x}")).collect()
}

/// system 渠道的 chat_id 形如 `channel:chat_id`，指向发起子任务的来源会话
fn system_origin(chat_id: &str) -> Option<(&str, &str)> {
    chat_id
        .split_once(':')
        .filter(|(channel, chat_id)| !channel.is_empty() && !chat_id.is_empty())
}

/// 回复与工具投递的目标 (channel, chat_id)：system 渠道送回来源会话，其余原样返回
pub fn reply_target(msg: &InboundMessage) -> (String, String) {
    if msg.channel.eq_ignore_ascii_case(SYSTEM_CHANNEL) {
        if let Some((channel, chat_id)) = system_origin(&msg.chat_id) {
            return (channel.to_string(), chat_id.to_string());
        }
    }
    (msg.channel.clone(), msg.chat_id.clone())
}

fn mapping_key(channel: &str, chat_id: &str) -> (String, String) {
    (channel.to_lowercase(), chat_id.to_string())
}

/// 路由解析器
#[derive(Debug, Clone)]
pub struct RoutingResolver {
    enabled: bool,
    unmapped_behavior: UnmappedBehavior,
    default_workspace: PathBuf,
    mappings: HashMap<(String, String), ResolvedMapping>,
}

impl RoutingResolver {
    /// 校验配置并构造：重复映射、工作区不存在/不是目录、空白名单都会直接失败
    pub fn new(config: &RoutingConfig, default_workspace: impl Into<PathBuf>) -> Result<Self, RoutingError> {
        let mut mappings = HashMap::new();
        for m in &config.mappings {
            if m.channel.trim().is_empty() {
                return Err(RoutingError::EmptyField("channel"));
            }
            if m.chat_id.trim().is_empty() {
                return Err(RoutingError::EmptyField("chat_id"));
            }
            if !m.workspace.exists() {
                return Err(RoutingError::WorkspaceMissing(m.workspace.clone()));
            }
            if !m.workspace.is_dir() {
                return Err(RoutingError::WorkspaceNotDir(m.workspace.clone()));
            }
            let allowed_senders: HashSet<String> = m
                .allowed_senders
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if allowed_senders.is_empty() {
                return Err(RoutingError::EmptyAllowedSenders {
                    channel: m.channel.clone(),
                    chat_id: m.chat_id.clone(),
                });
            }
            let workspace = m
                .workspace
                .canonicalize()
                .map_err(|_| RoutingError::WorkspaceMissing(m.workspace.clone()))?;

            let key = mapping_key(&m.channel, &m.chat_id);
            if mappings.contains_key(&key) {
                return Err(RoutingError::DuplicateMapping {
                    channel: m.channel.clone(),
                    chat_id: m.chat_id.clone(),
                });
            }
            mappings.insert(
                key,
                ResolvedMapping {
                    workspace,
                    allowed_senders,
                    label: m.label.clone(),
                    require_mention: m.require_mention.unwrap_or(true),
                },
            );
        }

        let default_workspace = default_workspace.into();
        let default_workspace = default_workspace.canonicalize().unwrap_or(default_workspace);

        Ok(Self {
            enabled: config.enabled,
            unmapped_behavior: config.unmapped_behavior,
            default_workspace,
            mappings,
        })
    }

    pub fn default_workspace(&self) -> &Path {
        &self.default_workspace
    }

    pub fn mapping_count(&self) -> usize {
        self.mappings.len()
    }

    /// 解析一条入站消息
    pub fn resolve(&self, msg: &InboundMessage) -> RoutingDecision {
        if msg.channel.eq_ignore_ascii_case(SYSTEM_CHANNEL) {
            return self.resolve_system(msg);
        }
        self.resolve_for(&msg.channel, &msg.chat_id, msg, false)
    }

    /// system 伪渠道：按 chat_id 中携带的来源会话重新解析，回复落到发起子任务的会话
    fn resolve_system(&self, msg: &InboundMessage) -> RoutingDecision {
        match system_origin(&msg.chat_id) {
            Some((channel, chat_id)) => self.resolve_for(channel, chat_id, msg, true),
            None => self.fallback(
                SYSTEM_CHANNEL,
                &msg.chat_id,
                RoutingEvent::Match,
                "system message without origin, using default workspace",
            ),
        }
    }

    fn resolve_for(
        &self,
        channel: &str,
        chat_id: &str,
        msg: &InboundMessage,
        trusted: bool,
    ) -> RoutingDecision {
        if !self.enabled {
            return self.fallback(channel, chat_id, RoutingEvent::Match, "routing disabled");
        }

        let Some(mapping) = self.mappings.get(&mapping_key(channel, chat_id)) else {
            return match self.unmapped_behavior {
                UnmappedBehavior::Default => self.fallback(
                    channel,
                    chat_id,
                    RoutingEvent::Unmapped,
                    "unmapped chat, using default workspace",
                ),
                UnmappedBehavior::Block => RoutingDecision {
                    event: RoutingEvent::Unmapped,
                    allowed: false,
                    workspace: PathBuf::new(),
                    session_key: String::new(),
                    reason: format!("no mapping for {channel}:{chat_id}"),
                    mapping_label: None,
                },
            };
        };

        let session_key = format!(
            "{}:{}@{}",
            channel.to_lowercase(),
            chat_id,
            workspace_hash(&mapping.workspace)
        );
        let decision = |event, allowed, reason: String| RoutingDecision {
            event,
            allowed,
            workspace: mapping.workspace.clone(),
            session_key: session_key.clone(),
            reason,
            mapping_label: mapping.label.clone(),
        };

        if !trusted
            && !mapping.allowed_senders.contains(ANY_SENDER)
            && !mapping.allowed_senders.contains(&msg.sender_id)
        {
            return decision(
                RoutingEvent::Deny,
                false,
                format!("sender {} not allowed", msg.sender_id),
            );
        }

        if !trusted && mapping.require_mention && !msg.flag("is_mention") && !msg.flag("is_dm") {
            return decision(
                RoutingEvent::MentionSkip,
                false,
                "mention required".to_string(),
            );
        }

        if !mapping.workspace.is_dir() {
            return decision(
                RoutingEvent::Invalid,
                false,
                format!("workspace unavailable: {}", mapping.workspace.display()),
            );
        }

        decision(RoutingEvent::Match, true, "mapping matched".to_string())
    }

    /// 默认工作区回退；会话键不带工作区哈希
    fn fallback(&self, channel: &str, chat_id: &str, event: RoutingEvent, reason: &str) -> RoutingDecision {
        let session_key = format!("{}:{}", channel.to_lowercase(), chat_id);
        if !self.default_workspace.is_dir() {
            return RoutingDecision {
                event: RoutingEvent::Invalid,
                allowed: false,
                workspace: self.default_workspace.clone(),
                session_key,
                reason: format!(
                    "default workspace unavailable: {}",
                    self.default_workspace.display()
                ),
                mapping_label: None,
            };
        }
        RoutingDecision {
            event,
            allowed: true,
            workspace: self.default_workspace.clone(),
            session_key,
            reason: reason.to_string(),
            mapping_label: None,
        }
    }
}
