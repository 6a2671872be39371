//! 单轮对话编排
//!
//! 已路由的入站消息 -> 构建上下文 -> 调用模型 -> （有工具调用时）执行工具 -> 再调用模型 …… -> 收尾。
//! 工具轮数受 max_tool_iterations 限制，超过即整轮失败；收尾后追加并持久化本轮消息，再触发自动归档。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::context::{ContextBuilder, ContextInput};
use super::fallback::{match_intent, render_reply};
use super::hooks::{fire_hooks, HookPhase, TurnEvent, TurnHook};
use crate::archive::{render_hits, ArchiveEngine, ArchiveResult};
use crate::bus::InboundMessage;
use crate::config::{AgentSection, ArchiveSection};
use crate::core::{GatewayError, Result};
use crate::llm::{ChatOptions, Provider, Usage};
use crate::session::{reply_target, Message, RoutingDecision, SessionStore, ToolCall};
use crate::tools::{ToolContext, ToolExecutor, MESSAGE_TOOL_NAME};

/// 模型常见的“无内容”占位回复
const PLACEHOLDER_REPLIES: [&str; 5] = [
    "no response",
    "(no response)",
    "done",
    "done.",
    "i've completed processing but have no response to give.",
];

/// 回复是否为空或通用占位
pub fn is_placeholder_reply(content: &str) -> bool {
    let trimmed = content.trim().to_lowercase();
    trimmed.is_empty() || PLACEHOLDER_REPLIES.contains(&trimmed.as_str())
}

/// 一轮对话的结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct TurnOutcome {
    pub session_key: String,
    pub reply: String,
    /// 回复内容已由 message 工具在本轮中途送达
    pub delivered_out_of_band: bool,
    /// 非 silent 工具给出的面向用户内容
    pub user_notes: Vec<String>,
    pub iterations: usize,
    pub tool_calls: usize,
    pub silent_results: usize,
    /// 命中的兜底意图
    pub fallback: Option<&'static str>,
    pub archived: Option<ArchiveResult>,
    pub usage: Usage,
}

/// 工具循环的中间产物
#[derive(Default)]
struct LoopState {
    turn_messages: Vec<Message>,
    pushed_content: Option<String>,
    user_notes: Vec<String>,
    tool_calls: usize,
    silent_results: usize,
    iterations: usize,
    usage: Usage,
}

/// 单轮编排器
pub struct TurnOrchestrator {
    provider: Arc<dyn Provider>,
    store: Arc<SessionStore>,
    executor: ToolExecutor,
    context: ContextBuilder,
    hooks: Vec<Arc<dyn TurnHook>>,
    agent: AgentSection,
    archive: ArchiveSection,
    default_workspace: PathBuf,
    engines: Mutex<HashMap<PathBuf, Arc<ArchiveEngine>>>,
}

impl TurnOrchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        store: Arc<SessionStore>,
        executor: ToolExecutor,
        context: ContextBuilder,
        agent: AgentSection,
        archive: ArchiveSection,
        default_workspace: impl Into<PathBuf>,
    ) -> Self {
        Self {
            provider,
            store,
            executor,
            context,
            hooks: Vec::new(),
            agent,
            archive,
            default_workspace: default_workspace.into(),
            engines: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn TurnHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// 工作区对应的归档引擎（按工作区缓存）
    pub fn archive_engine(&self, workspace: &Path) -> Arc<ArchiveEngine> {
        let mut engines = match self.engines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let engine = engines.entry(workspace.to_path_buf()).or_insert_with(|| {
            Arc::new(
                ArchiveEngine::new(Arc::clone(&self.store), workspace, self.archive.clone())
                    .owning_unhashed_keys(workspace == self.default_workspace),
            )
        });
        Arc::clone(engine)
    }

    /// 处理一条已放行的入站消息
    pub async fn process(
        &self,
        cancel: &CancellationToken,
        msg: &InboundMessage,
        decision: &RoutingDecision,
    ) -> Result<TurnOutcome> {
        if !decision.allowed {
            return Err(GatewayError::InvalidArgument(format!(
                "message not routable: {} ({})",
                decision.event, decision.reason
            )));
        }
        let key = decision.session_key.as_str();
        let workspace = decision.workspace.as_path();
        // system 渠道的工具投递同样指向来源会话
        let (reply_channel, reply_chat_id) = reply_target(msg);
        let tool_ctx = ToolContext::new(&reply_channel, &reply_chat_id, workspace);

        let mut event = TurnEvent {
            session_key: key,
            channel: &msg.channel,
            chat_id: &msg.chat_id,
            sender_id: &msg.sender_id,
            workspace,
            content: &msg.content,
            reply: None,
            tool_calls: 0,
            iterations: 0,
        };

        if self.agent.fallback_enabled {
            if let Some(intent) = match_intent(&msg.content) {
                tracing::info!(session = %key, intent = intent.name, "fallback intent matched");
                fire_hooks(&self.hooks, HookPhase::BeforeTurn, &event).await;
                let result = self
                    .executor
                    .execute(cancel, &tool_ctx, intent.tool, intent.args.clone())
                    .await;
                let reply = render_reply(&intent, &result);
                event.reply = Some(reply.as_str());
                event.tool_calls = 1;
                fire_hooks(&self.hooks, HookPhase::AfterTurn, &event).await;

                let turn = vec![Message::user(&msg.content), Message::assistant(&reply)];
                let archived = self.persist_turn(&msg.channel, key, workspace, turn).await?;
                return Ok(TurnOutcome {
                    session_key: key.to_string(),
                    reply,
                    tool_calls: 1,
                    fallback: Some(intent.name),
                    archived,
                    ..TurnOutcome::default()
                });
            }
        }

        let history = self.store.get_history(key).await;
        let recall = self.recall_section(&msg.channel, key, workspace, &msg.content).await;
        let mut messages = self.context.build(&ContextInput {
            channel: &msg.channel,
            chat_id: &msg.chat_id,
            workspace,
            history: &history,
            user_message: &msg.content,
            recall,
        });

        fire_hooks(&self.hooks, HookPhase::BeforeTurn, &event).await;

        let (content, state) = self.run_tool_loop(cancel, &tool_ctx, &mut messages).await?;

        let mut delivered_out_of_band = false;
        let reply = match (&state.pushed_content, is_placeholder_reply(&content)) {
            (Some(pushed), true) => {
                delivered_out_of_band = true;
                pushed.clone()
            }
            _ => content,
        };

        event.reply = Some(reply.as_str());
        event.tool_calls = state.tool_calls;
        event.iterations = state.iterations;
        fire_hooks(&self.hooks, HookPhase::AfterTurn, &event).await;

        let mut turn = Vec::with_capacity(state.turn_messages.len() + 2);
        turn.push(Message::user(&msg.content));
        turn.extend(state.turn_messages);
        turn.push(Message::assistant(&reply));
        let archived = self.persist_turn(&msg.channel, key, workspace, turn).await?;

        tracing::info!(
            session = %key,
            iterations = state.iterations,
            tool_calls = state.tool_calls,
            out_of_band = delivered_out_of_band,
            "turn completed"
        );

        Ok(TurnOutcome {
            session_key: key.to_string(),
            reply,
            delivered_out_of_band,
            user_notes: state.user_notes,
            iterations: state.iterations,
            tool_calls: state.tool_calls,
            silent_results: state.silent_results,
            fallback: None,
            archived,
            usage: state.usage,
        })
    }

    /// 模型 + 工具循环；返回最终内容
    async fn run_tool_loop(
        &self,
        cancel: &CancellationToken,
        tool_ctx: &ToolContext,
        messages: &mut Vec<Message>,
    ) -> Result<(String, LoopState)> {
        let definitions = self.executor.definitions();
        let model = self
            .agent
            .model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string());
        let options = ChatOptions {
            max_tokens: self.agent.max_tokens,
            temperature: self.agent.temperature,
            reasoning_effort: self.agent.reasoning_effort.clone(),
        }
        .to_map();

        let mut state = LoopState::default();
        while state.iterations < self.agent.max_tool_iterations {
            if cancel.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }
            state.iterations += 1;

            let response = self
                .provider
                .chat(cancel, messages, &definitions, &model, &options)
                .await?;
            state.usage.prompt_tokens += response.usage.prompt_tokens;
            state.usage.completion_tokens += response.usage.completion_tokens;
            state.usage.total_tokens += response.usage.total_tokens;

            if !response.has_tool_calls() {
                return Ok((response.content, state));
            }

            let assistant = Message::assistant_with_calls(&response.content, response.tool_calls.clone());
            messages.push(assistant.clone());
            state.turn_messages.push(assistant);

            for call in &response.tool_calls {
                let tool_message = self.execute_call(cancel, tool_ctx, call, &mut state).await;
                messages.push(tool_message.clone());
                state.turn_messages.push(tool_message);
            }
        }

        tracing::warn!(max = self.agent.max_tool_iterations, "tool iteration limit reached");
        Err(GatewayError::MaxIterations(self.agent.max_tool_iterations))
    }

    async fn execute_call(
        &self,
        cancel: &CancellationToken,
        tool_ctx: &ToolContext,
        call: &ToolCall,
        state: &mut LoopState,
    ) -> Message {
        state.tool_calls += 1;
        let result = self
            .executor
            .execute(cancel, tool_ctx, &call.name, call.arguments.clone())
            .await;

        // 只有推送到当前会话的内容才能替代最终回复
        if call.name == MESSAGE_TOOL_NAME
            && !result.is_error
            && targets_current_chat(tool_ctx, &call.arguments)
        {
            if let Some(content) = call.arguments.get("content").and_then(Value::as_str) {
                state.pushed_content = Some(content.to_string());
            }
        }
        if result.silent {
            state.silent_results += 1;
        } else if !result.for_user.trim().is_empty() {
            state.user_notes.push(result.for_user.clone());
        }
        Message::tool(&call.id, result.for_llm)
    }

    /// 仅对启用归档与回忆的渠道、且会话已有归档时注入回忆
    async fn recall_section(
        &self,
        channel: &str,
        key: &str,
        workspace: &Path,
        query: &str,
    ) -> Option<String> {
        if !self.archive.recall_enabled || !self.archive.channel_enabled(channel) {
            return None;
        }
        let engine = self.archive_engine(workspace);
        if !engine.has_archive(key).await {
            return None;
        }
        match engine
            .recall(query, Some(key), self.archive.recall_top_k, self.archive.recall_max_chars)
            .await
        {
            Ok(hits) if hits.is_empty() => None,
            Ok(hits) => {
                tracing::debug!(session = %key, hits = hits.len(), "recall injected");
                Some(render_hits(&hits))
            }
            Err(e) => {
                tracing::warn!(session = %key, error = %e, "recall failed");
                None
            }
        }
    }

    /// 追加本轮消息、自动归档、持久化；归档失败只记录日志
    async fn persist_turn(
        &self,
        channel: &str,
        key: &str,
        workspace: &Path,
        turn: Vec<Message>,
    ) -> Result<Option<ArchiveResult>> {
        self.store.append_messages(key, turn).await?;

        let mut archived = None;
        if self.archive.channel_enabled(channel) {
            match self.archive_engine(workspace).maybe_archive(key).await {
                Ok(result) => archived = result,
                Err(e) => tracing::warn!(session = %key, error = %e, "auto archive failed"),
            }
        }
        if archived.is_none() {
            self.store.save(key).await?;
        }
        Ok(archived)
    }
}

/// message 工具参数里的目标（缺省为当前上下文）是否就是当前会话
fn targets_current_chat(ctx: &ToolContext, args: &Value) -> bool {
    let channel = args.get("channel").and_then(Value::as_str).unwrap_or(&ctx.channel);
    let chat_id = args.get("chat_id").and_then(Value::as_str).unwrap_or(&ctx.chat_id);
    channel.eq_ignore_ascii_case(&ctx.channel) && chat_id == ctx.chat_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::llm::{ChatResponse, MockProvider};
    use crate::session::{RoutingEvent, Role};
    use crate::tools::{EchoTool, ToolRegistry};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        workspace: PathBuf,
        provider: Arc<MockProvider>,
        orchestrator: TurnOrchestrator,
    }

    async fn fixture(provider: MockProvider, agent: AgentSection) -> Fixture {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path().join("ws");
        std::fs::create_dir_all(&workspace).unwrap();
        let store = SessionStore::open(dir.path().join("sessions"), Duration::from_millis(750))
            .await
            .unwrap();
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let provider = Arc::new(provider);
        let orchestrator = TurnOrchestrator::new(
            Arc::clone(&provider) as Arc<dyn Provider>,
            store,
            ToolExecutor::new(registry, 5),
            ContextBuilder::new("You are Hive.", None),
            agent,
            ArchiveSection::default(),
            &workspace,
        );
        Fixture {
            _dir: dir,
            workspace,
            provider,
            orchestrator,
        }
    }

    fn decision(workspace: &Path) -> RoutingDecision {
        RoutingDecision {
            event: RoutingEvent::Match,
            allowed: true,
            workspace: workspace.to_path_buf(),
            session_key: "cli:1".into(),
            reason: String::new(),
            mapping_label: None,
        }
    }

    fn call(id: &str, name: &str, args: Value) -> ToolCall {
        ToolCall::new(id, name, args)
    }

    #[tokio::test]
    async fn test_tool_round_then_reply() {
        let provider = MockProvider::scripted([
            ChatResponse::with_tool_calls("", vec![call("c1", "echo", serde_json::json!({"text": "pong"}))]),
            ChatResponse::text("all good"),
        ]);
        let f = fixture(provider, AgentSection::default()).await;
        let msg = InboundMessage::new("cli", "1", "user", "check echo please");

        let outcome = f
            .orchestrator
            .process(&CancellationToken::new(), &msg, &decision(&f.workspace))
            .await
            .unwrap();
        assert_eq!(outcome.reply, "all good");
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.tool_calls, 1);

        let requests = f.provider.requests();
        let second = &requests[1].messages;
        let tool_msg = second.last().unwrap();
        assert_eq!(tool_msg.role, Role::Tool);
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("c1"));
        assert_eq!(tool_msg.content, "pong");

        let history = f.orchestrator.store().get_history("cli:1").await;
        assert_eq!(history.len(), 4);
        assert_eq!(history[3].content, "all good");
    }

    #[tokio::test]
    async fn test_unknown_tool_does_not_abort() {
        let provider = MockProvider::scripted([
            ChatResponse::with_tool_calls("", vec![call("c1", "teleport", Value::Null)]),
            ChatResponse::text("could not teleport"),
        ]);
        let f = fixture(provider, AgentSection::default()).await;
        let msg = InboundMessage::new("cli", "1", "user", "beam me up");

        let outcome = f
            .orchestrator
            .process(&CancellationToken::new(), &msg, &decision(&f.workspace))
            .await
            .unwrap();
        assert_eq!(outcome.reply, "could not teleport");
        let requests = f.provider.requests();
        assert!(requests[1].messages.last().unwrap().content.contains("Unknown tool: teleport"));
    }

    #[tokio::test]
    async fn test_max_iterations_is_fatal() {
        let provider = MockProvider::new();
        for i in 0..3 {
            provider.push(ChatResponse::with_tool_calls(
                "",
                vec![call(&format!("c{i}"), "echo", serde_json::json!({"text": "again"}))],
            ));
        }
        let agent = AgentSection {
            max_tool_iterations: 2,
            ..AgentSection::default()
        };
        let f = fixture(provider, agent).await;
        let msg = InboundMessage::new("cli", "1", "user", "loop forever");

        let err = f
            .orchestrator
            .process(&CancellationToken::new(), &msg, &decision(&f.workspace))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::MaxIterations(2)));
        assert!(f.orchestrator.store().get_history("cli:1").await.is_empty());
    }

    #[tokio::test]
    async fn test_fallback_skips_provider() {
        let f = fixture(MockProvider::new(), AgentSection::default()).await;
        let msg = InboundMessage::new("cli", "1", "user", "ping");

        let outcome = f
            .orchestrator
            .process(&CancellationToken::new(), &msg, &decision(&f.workspace))
            .await
            .unwrap();
        assert_eq!(outcome.reply, "pong");
        assert_eq!(outcome.fallback, Some("ping"));
        assert_eq!(f.provider.call_count(), 0);

        let agent = AgentSection {
            fallback_enabled: false,
            ..AgentSection::default()
        };
        let f = fixture(MockProvider::new(), agent).await;
        let outcome = f
            .orchestrator
            .process(&CancellationToken::new(), &msg, &decision(&f.workspace))
            .await
            .unwrap();
        assert_eq!(outcome.reply, "Echo: ping");
        assert_eq!(f.provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_denied_decision_rejected() {
        let f = fixture(MockProvider::new(), AgentSection::default()).await;
        let msg = InboundMessage::new("cli", "1", "user", "hi");
        let denied = RoutingDecision {
            allowed: false,
            event: RoutingEvent::Deny,
            ..decision(&f.workspace)
        };
        let err = f
            .orchestrator
            .process(&CancellationToken::new(), &msg, &denied)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidArgument(_)));
    }

    #[test]
    fn test_placeholder_detection() {
        assert!(is_placeholder_reply("  "));
        assert!(is_placeholder_reply("Done."));
        assert!(!is_placeholder_reply("Done with the report"));
    }
}
