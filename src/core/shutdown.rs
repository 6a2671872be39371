//! 优雅关闭
//!
//! 网关只有一个根 CancellationToken：Ctrl+C、SIGTERM 或 stdin 结束都会触发它，
//! 总线、Provider 与工具都从它派生取消。记录的是第一个关闭原因，后续触发只补取消。
//!
//! 退出前由 ShutdownSequence 在总时限内依次执行收尾任务（目前是会话落盘）。

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::Result;
use crate::session::SessionStore;

/// 关闭原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// cli 渠道输入结束
    InputClosed,
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Interrupt => "interrupt",
            Self::Terminate => "terminate",
            Self::InputClosed => "input closed",
        })
    }
}

/// 根取消令牌与关闭原因
#[derive(Debug, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason: OnceLock<ShutdownReason>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 根令牌的克隆，传给总线消费者与各后台任务
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 触发关闭；返回本次是否为第一次触发
    pub fn shutdown(&self, reason: ShutdownReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        if first {
            tracing::info!(%reason, "shutdown requested");
        }
        self.token.cancel();
        first
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 第一个关闭原因
    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().copied()
    }

    /// 监听 Ctrl+C 与（unix 下）SIGTERM
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                manager.shutdown(ShutdownReason::Interrupt);
            }
        });

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                        manager.shutdown(ShutdownReason::Terminate);
                    }
                    Err(e) => tracing::warn!(error = %e, "SIGTERM handler not installed"),
                }
            });
        }
    }
}

/// 退出前的收尾任务
#[async_trait]
pub trait ShutdownTask: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> Result<()>;
}

/// 收尾结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    /// 因总时限耗尽而未完成或未开始的任务
    pub skipped: Vec<String>,
}

/// 在总时限内依次执行收尾任务
pub struct ShutdownSequence {
    tasks: Vec<Box<dyn ShutdownTask>>,
    deadline: Duration,
}

impl ShutdownSequence {
    pub fn new(deadline: Duration) -> Self {
        Self {
            tasks: Vec::new(),
            deadline,
        }
    }

    pub fn push(mut self, task: impl ShutdownTask + 'static) -> Self {
        self.tasks.push(Box::new(task));
        self
    }

    /// 失败不中断后续任务；超时之后剩余任务全部记为 skipped
    pub async fn run(&self) -> ShutdownReport {
        let started = Instant::now();
        let mut report = ShutdownReport::default();
        for task in &self.tasks {
            let name = task.name().to_string();
            let remaining = self.deadline.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                report.skipped.push(name);
                continue;
            }
            match tokio::time::timeout(remaining, task.run()).await {
                Ok(Ok(())) => report.completed.push(name),
                Ok(Err(e)) => {
                    tracing::warn!(task = %name, error = %e, "shutdown task failed");
                    report.failed.push(name);
                }
                Err(_) => {
                    tracing::warn!(task = %name, deadline_ms = self.deadline.as_millis() as u64, "shutdown deadline reached");
                    report.skipped.push(name);
                }
            }
        }
        tracing::info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "shutdown sequence finished"
        );
        report
    }
}

/// 把内存中的全部会话写盘
pub struct SessionFlush {
    store: Arc<SessionStore>,
}

impl SessionFlush {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ShutdownTask for SessionFlush {
    fn name(&self) -> &str {
        "session-flush"
    }

    async fn run(&self) -> Result<()> {
        let saved = self.store.save_all().await?;
        tracing::info!(saved, "sessions flushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::GatewayError;
    use crate::session::Message;
    use tempfile::TempDir;

    struct Stall;

    #[async_trait]
    impl ShutdownTask for Stall {
        fn name(&self) -> &str {
            "stall"
        }

        async fn run(&self) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl ShutdownTask for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn run(&self) -> Result<()> {
            Err(GatewayError::InvalidArgument("disk gone".into()))
        }
    }

    #[test]
    fn test_first_reason_wins() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        assert!(!manager.is_shutdown());
        assert_eq!(manager.reason(), None);

        assert!(manager.shutdown(ShutdownReason::InputClosed));
        assert!(!manager.shutdown(ShutdownReason::Interrupt));
        assert!(token.is_cancelled());
        assert_eq!(manager.reason(), Some(ShutdownReason::InputClosed));
    }

    #[tokio::test]
    async fn test_session_flush_persists_sessions() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::open(dir.path(), Duration::from_millis(750)).await.unwrap();
        store.add_message("cli:flush", Message::user("hello")).await.unwrap();

        let report = ShutdownSequence::new(Duration::from_secs(5))
            .push(Broken)
            .push(SessionFlush::new(Arc::clone(&store)))
            .run()
            .await;

        assert_eq!(report.failed, vec!["broken".to_string()]);
        assert_eq!(report.completed, vec!["session-flush".to_string()]);
        assert!(dir.path().join("cli:flush.json").exists());
    }

    #[tokio::test]
    async fn test_deadline_skips_remaining_tasks() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::open(dir.path(), Duration::from_millis(750)).await.unwrap();

        let report = ShutdownSequence::new(Duration::from_millis(50))
            .push(Stall)
            .push(SessionFlush::new(store))
            .run()
            .await;

        assert!(report.completed.is_empty());
        assert_eq!(report.skipped, vec!["stall".to_string(), "session-flush".to_string()]);
    }
}
