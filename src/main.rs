//! Hive - 个人助理网关
//!
//! 入口：加载配置、初始化日志、装配总线 / 会话存储 / 路由 / 编排器，
//! 以 stdin/stdout 作为 "cli" 渠道运行，直到 EOF 或 Ctrl+C，然后关闭总线并落盘会话。
//!
//! 运行方式：
//! ```bash
//! HIVE_CONFIG=config/default.toml cargo run
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use hive::agent::{AgentRunner, AuditLogHook, ContextBuilder, TurnOrchestrator};
use hive::bus::{InboundMessage, MessageBus};
use hive::config::load_config;
use hive::core::{SessionFlush, ShutdownManager, ShutdownReason, ShutdownSequence};
use hive::llm::{MockProvider, Provider};
use hive::session::{RoutingResolver, SessionStore};
use hive::tools::{builtin_registry, ToolExecutor};

const CLI_CHANNEL: &str = "cli";
const CLI_CHAT_ID: &str = "local";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let config_path = std::env::var("HIVE_CONFIG").ok().map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load configuration")?;

    std::fs::create_dir_all(&cfg.app.default_workspace).with_context(|| {
        format!(
            "Failed to create default workspace {}",
            cfg.app.default_workspace.display()
        )
    })?;

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    let token = shutdown.token();

    let bus = Arc::new(MessageBus::new(cfg.bus.capacity));
    let store = SessionStore::open_with(
        &cfg.app.storage_dir,
        Duration::from_millis(cfg.session.preload_timeout_ms),
        Duration::from_millis(cfg.session.save_warn_ms),
    )
    .await
    .context("Failed to open session store")?;

    let resolver = RoutingResolver::new(&cfg.routing, &cfg.app.default_workspace)
        .context("Invalid routing configuration")?;
    let default_workspace = resolver.default_workspace().to_path_buf();

    let executor = ToolExecutor::new(builtin_registry(Arc::clone(&bus)), cfg.agent.tool_timeout_secs);
    let provider: Arc<dyn Provider> = Arc::new(MockProvider::new());
    tracing::info!(model = provider.default_model(), "provider ready");

    let mut orchestrator = TurnOrchestrator::new(
        provider,
        Arc::clone(&store),
        executor,
        ContextBuilder::new(cfg.app.system_prompt.clone(), cfg.app.global_workspace.clone()),
        cfg.agent.clone(),
        cfg.archive.clone(),
        default_workspace,
    );
    if cfg.hooks.enabled {
        orchestrator = orchestrator.with_hook(Arc::new(AuditLogHook::new(cfg.hooks.audit_file.clone())));
    }

    let runner = AgentRunner::new(Arc::clone(&bus), resolver, Arc::new(orchestrator));
    let runner_token = token.clone();
    let runner_task = tokio::spawn(async move { runner.run(&runner_token).await });

    let printer_bus = Arc::clone(&bus);
    let printer_token = token.clone();
    let printer_task = tokio::spawn(async move {
        while let Ok(out) = printer_bus.subscribe_outbound(&printer_token).await {
            if out.channel == CLI_CHANNEL {
                println!("{}", out.content);
            } else {
                tracing::info!(channel = %out.channel, chat_id = %out.chat_id, "outbound for non-cli channel dropped");
            }
        }
    });

    tracing::info!(name = %cfg.app.name, "hive started, type a message (Ctrl+D to exit)");
    read_stdin(&bus, &token).await;

    bus.close();
    let _ = runner_task.await;
    let _ = printer_task.await;
    shutdown.shutdown(ShutdownReason::InputClosed);

    ShutdownSequence::new(Duration::from_secs(10))
        .push(SessionFlush::new(store))
        .run()
        .await;

    let reason = shutdown.reason().unwrap_or(ShutdownReason::InputClosed);
    tracing::info!(%reason, "hive stopped");
    Ok(())
}

/// stdin 每行一条消息，发布为 cli 渠道的私聊消息
async fn read_stdin(bus: &MessageBus, token: &CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = token.cancelled() => break,
            line = lines.next_line() => line,
        };
        let text = match line {
            Ok(Some(text)) => text,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "stdin read failed");
                break;
            }
        };
        if text.trim().is_empty() {
            continue;
        }
        let msg = InboundMessage::new(CLI_CHANNEL, CLI_CHAT_ID, "user", text).with_metadata("is_dm", true);
        if let Err(e) = bus.publish_inbound(token, msg).await {
            tracing::info!(error = %e, "inbound bus unavailable");
            break;
        }
    }
}
