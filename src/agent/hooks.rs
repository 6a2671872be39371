//! 生命周期钩子
//!
//! before_turn 在首次调用模型前触发，after_turn 在最终回复确定后触发。
//! 钩子失败只记日志，不影响本轮对话。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

/// 钩子看到的本轮信息
#[derive(Debug, Clone, Serialize)]
pub struct TurnEvent<'a> {
    pub session_key: &'a str,
    pub channel: &'a str,
    pub chat_id: &'a str,
    pub sender_id: &'a str,
    #[serde(skip)]
    pub workspace: &'a Path,
    pub content: &'a str,
    /// after_turn 时为最终回复
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<&'a str>,
    pub tool_calls: usize,
    pub iterations: usize,
}

#[async_trait]
pub trait TurnHook: Send + Sync {
    fn name(&self) -> &str;

    async fn before_turn(&self, event: &TurnEvent<'_>) -> anyhow::Result<()>;

    async fn after_turn(&self, event: &TurnEvent<'_>) -> anyhow::Result<()>;
}

/// 审计钩子：每次触发向 `{workspace}/{audit_file}` 追加一行 JSON
pub struct AuditLogHook {
    audit_file: PathBuf,
}

impl AuditLogHook {
    pub fn new(audit_file: impl Into<PathBuf>) -> Self {
        Self {
            audit_file: audit_file.into(),
        }
    }

    async fn append(&self, kind: &str, event: &TurnEvent<'_>) -> anyhow::Result<()> {
        let path = event.workspace.join(&self.audit_file);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let line = serde_json::json!({
            "ts": Utc::now().to_rfc3339(),
            "hook": kind,
            "event": event,
        });
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(format!("{line}\n").as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl TurnHook for AuditLogHook {
    fn name(&self) -> &str {
        "audit_log"
    }

    async fn before_turn(&self, event: &TurnEvent<'_>) -> anyhow::Result<()> {
        self.append("before_turn", event).await
    }

    async fn after_turn(&self, event: &TurnEvent<'_>) -> anyhow::Result<()> {
        self.append("after_turn", event).await
    }
}

/// 钩子阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    BeforeTurn,
    AfterTurn,
}

/// 依次触发所有钩子；失败只告警
pub async fn fire_hooks(hooks: &[std::sync::Arc<dyn TurnHook>], phase: HookPhase, event: &TurnEvent<'_>) {
    for hook in hooks {
        let result = match phase {
            HookPhase::BeforeTurn => hook.before_turn(event).await,
            HookPhase::AfterTurn => hook.after_turn(event).await,
        };
        if let Err(e) = result {
            tracing::warn!(hook = hook.name(), phase = ?phase, error = %e, "hook failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct FailingHook;

    #[async_trait]
    impl TurnHook for FailingHook {
        fn name(&self) -> &str {
            "failing"
        }

        async fn before_turn(&self, _event: &TurnEvent<'_>) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }

        async fn after_turn(&self, _event: &TurnEvent<'_>) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    fn event(ws: &Path) -> TurnEvent<'_> {
        TurnEvent {
            session_key: "cli:1",
            channel: "cli",
            chat_id: "1",
            sender_id: "user",
            workspace: ws,
            content: "hello",
            reply: None,
            tool_calls: 0,
            iterations: 0,
        }
    }

    #[tokio::test]
    async fn test_audit_lines_appended_and_failures_tolerated() {
        let ws = TempDir::new().unwrap();
        let hooks: Vec<Arc<dyn TurnHook>> = vec![
            Arc::new(FailingHook),
            Arc::new(AuditLogHook::new("memory/hooks.jsonl")),
        ];

        let before = event(ws.path());
        fire_hooks(&hooks, HookPhase::BeforeTurn, &before).await;
        let after = TurnEvent {
            reply: Some("hi"),
            iterations: 1,
            ..event(ws.path())
        };
        fire_hooks(&hooks, HookPhase::AfterTurn, &after).await;

        let text = std::fs::read_to_string(ws.path().join("memory/hooks.jsonl")).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["hook"], "before_turn");
        assert_eq!(lines[1]["event"]["reply"], "hi");
    }
}
