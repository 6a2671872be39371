//! 会话存储
//!
//! 一把粗粒度锁保护 key -> Session 映射；save 在锁内深拷贝快照，释放锁后再写盘，
//! 慢磁盘不会阻塞其他会话的内存读写。每个会话一个 JSON 文件：`{storage}/{key}.json`。
//!
//! 构造时在限定时间内预加载磁盘上的会话；超时后以已加载部分启动，剩余部分在后台继续加载。
//! 需要强一致的调用方可以 `wait_loaded()` 等待预加载结束。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};

use super::atomic::{is_temp_file, write_atomic};
use super::message::Message;
use crate::core::{GatewayError, Result};

/// save 耗时超过此值时告警
const DEFAULT_SAVE_WARN: Duration = Duration::from_millis(200);

/// 单个会话：消息历史 + 摘要 + 时间戳
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub key: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub summary: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Session {
    pub fn new(key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            messages: Vec::new(),
            summary: String::new(),
            created: now,
            updated: now,
        }
    }

    fn touch(&mut self) {
        self.updated = Utc::now();
    }
}

/// 会话键必须能安全地作为文件名：非空、不含路径分隔符、不是 "." / ".."
pub fn validate_session_key(key: &str) -> Result<()> {
    if key.is_empty() || key == "." || key == ".." {
        return Err(GatewayError::InvalidArgument(format!(
            "invalid session key: {key:?}"
        )));
    }
    if key.contains(['/', '\\', '\0']) {
        return Err(GatewayError::InvalidArgument(format!(
            "session key contains a path separator: {key:?}"
        )));
    }
    Ok(())
}

/// 会话存储
pub struct SessionStore {
    dir: PathBuf,
    sessions: RwLock<HashMap<String, Session>>,
    loaded_rx: watch::Receiver<bool>,
    save_warn: Duration,
}

impl SessionStore {
    /// 打开存储目录并预加载已有会话（最多等待 preload_timeout）
    pub async fn open(dir: impl AsRef<Path>, preload_timeout: Duration) -> Result<Arc<Self>> {
        Self::open_with(dir, preload_timeout, DEFAULT_SAVE_WARN).await
    }

    /// 同 open，并指定 save 慢操作告警阈值
    pub async fn open_with(
        dir: impl AsRef<Path>,
        preload_timeout: Duration,
        save_warn: Duration,
    ) -> Result<Arc<Self>> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let (loaded_tx, loaded_rx) = watch::channel(false);
        let store = Arc::new(Self {
            dir,
            sessions: RwLock::new(HashMap::new()),
            loaded_rx,
            save_warn,
        });

        let loader = Arc::clone(&store);
        tokio::spawn(async move {
            let loaded = loader.preload().await;
            tracing::info!(loaded, dir = %loader.dir.display(), "session preload finished");
            let _ = loaded_tx.send(true);
        });

        if tokio::time::timeout(preload_timeout, store.wait_loaded())
            .await
            .is_err()
        {
            tracing::warn!(
                timeout_ms = preload_timeout.as_millis() as u64,
                loaded = store.len().await,
                "session preload timed out, continuing in background"
            );
        }

        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 等待后台预加载结束
    pub async fn wait_loaded(&self) {
        let mut rx = self.loaded_rx.clone();
        // 发送端提前消失（加载任务异常退出）时同样视为结束
        let _ = rx.wait_for(|loaded| *loaded).await;
    }

    pub fn is_loaded(&self) -> bool {
        *self.loaded_rx.borrow()
    }

    async fn preload(&self) -> usize {
        let dir = self.dir.clone();
        let paths = tokio::task::spawn_blocking(move || {
            walkdir::WalkDir::new(&dir)
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .map(|e| e.into_path())
                .filter(|p| {
                    p.is_file()
                        && !is_temp_file(p)
                        && p.extension().map_or(false, |ext| ext == "json")
                })
                .collect::<Vec<_>>()
        })
        .await
        .unwrap_or_default();

        let mut loaded = 0;
        for path in paths {
            let Some(key) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            if validate_session_key(&key).is_err() {
                continue;
            }
            let data = match tokio::fs::read(&path).await {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to read session file");
                    continue;
                }
            };
            let mut session: Session = match serde_json::from_slice(&data) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to parse session file");
                    continue;
                }
            };
            session.key = key.clone();
            // 预加载期间已在内存中创建的会话以内存为准
            self.sessions.write().await.entry(key).or_insert(session);
            loaded += 1;
        }
        loaded
    }

    /// 获取或创建会话，返回快照
    pub async fn get_or_create(&self, key: &str) -> Result<Session> {
        validate_session_key(key)?;
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(key.to_string())
            .or_insert_with(|| Session::new(key));
        Ok(session.clone())
    }

    /// 追加一条消息（会话不存在时自动创建）
    pub async fn add_message(&self, key: &str, message: Message) -> Result<()> {
        validate_session_key(key)?;
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(key.to_string())
            .or_insert_with(|| Session::new(key));
        session.messages.push(message);
        session.touch();
        Ok(())
    }

    /// 批量追加（单次加锁，保证一轮对话的消息连续写入）
    pub async fn append_messages(&self, key: &str, messages: Vec<Message>) -> Result<()> {
        validate_session_key(key)?;
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(key.to_string())
            .or_insert_with(|| Session::new(key));
        session.messages.extend(messages);
        session.touch();
        Ok(())
    }

    /// 获取会话历史副本；会话不存在时为空
    pub async fn get_history(&self, key: &str) -> Vec<Message> {
        self.sessions
            .read()
            .await
            .get(key)
            .map(|s| s.messages.clone())
            .unwrap_or_default()
    }

    /// 整体替换历史；存储保存的是副本，调用方之后修改自己的切片不影响存储
    pub async fn replace_history(&self, key: &str, messages: &[Message]) -> Result<()> {
        validate_session_key(key)?;
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(key.to_string())
            .or_insert_with(|| Session::new(key));
        session.messages = messages.to_vec();
        session.touch();
        Ok(())
    }

    /// 在写锁内去掉与 prefix 相同的开头部分，之后追加的消息原样保留。
    /// 返回剩余条数；当前历史不再以 prefix 开头时不做修改并返回 None。
    pub async fn trim_prefix(&self, key: &str, prefix: &[Message]) -> Result<Option<usize>> {
        validate_session_key(key)?;
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(key) else {
            return Ok(None);
        };
        if !session.messages.starts_with(prefix) {
            return Ok(None);
        }
        session.messages.drain(..prefix.len());
        session.touch();
        Ok(Some(session.messages.len()))
    }

    /// 只保留最后 keep_last 条消息
    pub async fn truncate(&self, key: &str, keep_last: usize) -> Result<()> {
        validate_session_key(key)?;
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(key) {
            let len = session.messages.len();
            if len > keep_last {
                session.messages.drain(..len - keep_last);
                session.touch();
            }
        }
        Ok(())
    }

    /// 会话深拷贝快照
    pub async fn snapshot(&self, key: &str) -> Option<Session> {
        self.sessions.read().await.get(key).cloned()
    }

    pub async fn summary(&self, key: &str) -> String {
        self.sessions
            .read()
            .await
            .get(key)
            .map(|s| s.summary.clone())
            .unwrap_or_default()
    }

    pub async fn set_summary(&self, key: &str, summary: impl Into<String>) -> Result<()> {
        validate_session_key(key)?;
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(key.to_string())
            .or_insert_with(|| Session::new(key));
        session.summary = summary.into();
        session.touch();
        Ok(())
    }

    /// 所有会话键（排序）
    pub async fn list_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub fn session_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// 持久化单个会话：锁内取快照，锁外序列化并原子写盘
    pub async fn save(&self, key: &str) -> Result<()> {
        validate_session_key(key)?;
        let snapshot = self
            .snapshot(key)
            .await
            .ok_or_else(|| GatewayError::InvalidArgument(format!("unknown session: {key}")))?;

        let start = Instant::now();
        let data = serde_json::to_vec_pretty(&snapshot)?;
        let path = self.session_path(key);
        tokio::task::spawn_blocking(move || write_atomic(&path, &data))
            .await
            .map_err(|e| GatewayError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        let elapsed = start.elapsed();
        if elapsed > self.save_warn {
            tracing::warn!(
                session = %key,
                elapsed_ms = elapsed.as_millis() as u64,
                "slow session save"
            );
        } else {
            tracing::debug!(session = %key, elapsed_ms = elapsed.as_millis() as u64, "session saved");
        }
        Ok(())
    }

    /// 保存全部会话，返回成功数；遇到第一个错误即返回
    pub async fn save_all(&self) -> Result<usize> {
        let keys = self.list_keys().await;
        for key in &keys {
            self.save(key).await?;
        }
        Ok(keys.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PRELOAD: Duration = Duration::from_millis(750);

    #[tokio::test]
    async fn test_save_and_reload_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::open(dir.path(), PRELOAD).await.unwrap();
        store.add_message("telegram:42", Message::user("hi")).await.unwrap();
        store
            .add_message("telegram:42", Message::assistant("hello there"))
            .await
            .unwrap();
        store.add_message("telegram:42", Message::tool("call_1", "ok")).await.unwrap();
        store.save("telegram:42").await.unwrap();

        let reopened = SessionStore::open(dir.path(), PRELOAD).await.unwrap();
        reopened.wait_loaded().await;
        let history = reopened.get_history("telegram:42").await;
        assert_eq!(history, store.get_history("telegram:42").await);
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].tool_call_id.as_deref(), Some("call_1"));
    }

    #[tokio::test]
    async fn test_replace_history_is_not_aliased() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::open(dir.path(), PRELOAD).await.unwrap();

        let mut mine = vec![Message::user("a"), Message::assistant("b")];
        store.replace_history("cli:1", &mine).await.unwrap();
        mine[0].content = "mutated".to_string();
        mine.push(Message::user("extra"));

        let mut snap = store.snapshot("cli:1").await.unwrap();
        snap.messages.clear();

        let history = store.get_history("cli:1").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "a");
    }

    #[tokio::test]
    async fn test_invalid_keys_rejected() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::open(dir.path(), PRELOAD).await.unwrap();

        for key in ["", ".", "..", "../etc/passwd", "a\\b", "x/y"] {
            let err = store.add_message(key, Message::user("x")).await.unwrap_err();
            assert!(matches!(err, GatewayError::InvalidArgument(_)), "key {key:?}");
        }
        assert!(matches!(
            store.save("..").await,
            Err(GatewayError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_truncate_keeps_tail() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::open(dir.path(), PRELOAD).await.unwrap();
        for i in 0..5 {
            store.add_message("cli:t", Message::user(format!("m{i}"))).await.unwrap();
        }
        store.truncate("cli:t", 2).await.unwrap();
        let history = store.get_history("cli:t").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "m3");
    }

    #[tokio::test]
    async fn test_trim_prefix_keeps_later_appends() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::open(dir.path(), PRELOAD).await.unwrap();
        for i in 0..4 {
            store.add_message("cli:p", Message::user(format!("m{i}"))).await.unwrap();
        }
        let snapshot = store.get_history("cli:p").await;
        store.add_message("cli:p", Message::user("late")).await.unwrap();

        let remaining = store.trim_prefix("cli:p", &snapshot[..3]).await.unwrap();
        assert_eq!(remaining, Some(2));
        let history = store.get_history("cli:p").await;
        assert_eq!(history[0].content, "m3");
        assert_eq!(history[1].content, "late");

        // 前缀已不匹配：不修改
        assert_eq!(store.trim_prefix("cli:p", &snapshot[..1]).await.unwrap(), None);
        assert_eq!(store.get_history("cli:p").await.len(), 2);
        assert_eq!(store.trim_prefix("cli:none", &snapshot[..1]).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_background_preload_signals_ready() {
        let dir = TempDir::new().unwrap();
        {
            let store = SessionStore::open(dir.path(), PRELOAD).await.unwrap();
            for i in 0..20 {
                let key = format!("cli:{i}");
                store.add_message(&key, Message::user("x")).await.unwrap();
            }
            assert_eq!(store.save_all().await.unwrap(), 20);
        }

        let store = SessionStore::open(dir.path(), Duration::ZERO).await.unwrap();
        store.wait_loaded().await;
        assert!(store.is_loaded());
        assert_eq!(store.list_keys().await.len(), 20);
    }

    #[tokio::test]
    async fn test_save_unknown_session_fails() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::open(dir.path(), PRELOAD).await.unwrap();
        assert!(store.save("cli:missing").await.is_err());
        assert!(!store.session_path("cli:missing").exists());
    }
}
