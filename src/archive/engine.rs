//! 归档引擎
//!
//! 会话超过消息数或 token 阈值时，把较早的部分写入一份新的带时间戳 Markdown 归档（从不覆盖），
//! 会话只保留尾部；随后更新工作区的归档状态文档。dry_run 只计算不落盘。
//! 每个引擎绑定一个工作区：归档目录 `{workspace}/memory/archive/`。

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use super::recall::{self, file_matches_session, list_archive_files, RecallHit, RecallRequest};
use super::state::ArchiveState;
use super::trim::{archivable_entries, calculate_keep_start, estimate_tokens, render_archive, sanitize_key};
use crate::config::ArchiveSection;
use crate::core::{GatewayError, Result};
use crate::session::{validate_session_key, workspace_hash, Message, SessionStore};

/// 同一毫秒内重名时的最大重试次数
const MAX_NAME_ATTEMPTS: usize = 100;

/// 单次归档的选项
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveOptions {
    /// 只计算，不写归档、不改会话
    pub dry_run: bool,
    /// 未超过阈值也执行裁剪
    pub force: bool,
}

/// 单次归档结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveResult {
    pub session_key: String,
    pub archived_count: usize,
    pub kept_count: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub archive_path: Option<PathBuf>,
    pub over_limit: bool,
    pub dry_run: bool,
}

/// 归档引擎
pub struct ArchiveEngine {
    store: Arc<SessionStore>,
    workspace: PathBuf,
    settings: ArchiveSection,
    workspace_tag: String,
    /// 是否负责不带工作区哈希的会话键（默认工作区）
    owns_unhashed_keys: bool,
}

impl ArchiveEngine {
    pub fn new(store: Arc<SessionStore>, workspace: impl Into<PathBuf>, settings: ArchiveSection) -> Self {
        let workspace = workspace.into();
        let workspace_tag = workspace_hash(&workspace);
        Self {
            store,
            workspace,
            settings,
            workspace_tag,
            owns_unhashed_keys: false,
        }
    }

    /// 标记为默认工作区引擎：负责 channel:chat 形式（无哈希）的会话键
    pub fn owning_unhashed_keys(mut self, owns: bool) -> Self {
        self.owns_unhashed_keys = owns;
        self
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn settings(&self) -> &ArchiveSection {
        &self.settings
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.workspace.join("memory").join("archive")
    }

    pub fn state_path(&self) -> PathBuf {
        self.workspace.join("memory").join("archive_state.json")
    }

    /// 会话键是否归本工作区管理
    pub fn owns_session(&self, key: &str) -> bool {
        match key.rsplit_once('@') {
            Some((_, tag)) => tag == self.workspace_tag,
            None => self.owns_unhashed_keys,
        }
    }

    /// 是否超过阈值；返回 (超限, token 估算)
    pub fn over_limit(&self, messages: &[Message]) -> (bool, usize) {
        let tokens = estimate_tokens(messages);
        let over = messages.len() > self.settings.max_session_messages
            || tokens > self.settings.max_session_tokens;
        (over, tokens)
    }

    /// 归档单个会话
    pub async fn archive_session(&self, key: &str, opts: ArchiveOptions) -> Result<ArchiveResult> {
        validate_session_key(key)?;
        let history = self.store.get_history(key).await;
        let (over_limit, tokens_before) = self.over_limit(&history);

        let mut result = ArchiveResult {
            session_key: key.to_string(),
            archived_count: 0,
            kept_count: history.len(),
            tokens_before,
            tokens_after: tokens_before,
            archive_path: None,
            over_limit,
            dry_run: opts.dry_run,
        };
        if !over_limit && !opts.force {
            return Ok(result);
        }

        let start = calculate_keep_start(
            &history,
            self.settings.keep_user_pairs,
            self.settings.min_tail_messages,
        );
        if start == 0 {
            return Ok(result);
        }

        let (archivable, kept) = history.split_at(start);
        result.archived_count = archivable.len();
        result.kept_count = kept.len();
        result.tokens_after = estimate_tokens(kept);
        if opts.dry_run {
            return Ok(result);
        }

        let entries = archivable_entries(archivable);
        if !entries.is_empty() {
            let markdown = render_archive(key, Utc::now(), &entries, self.settings.max_message_chars);
            let dir = self.archive_dir();
            let stem = sanitize_key(key);
            let path = tokio::task::spawn_blocking(move || write_new_archive(&dir, &stem, &markdown))
                .await
                .map_err(|e| GatewayError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;
            result.archive_path = Some(path);
        }

        // 只去掉已归档的前缀；快照之后追加的消息保留
        match self.store.trim_prefix(key, archivable).await? {
            Some(remaining) => result.kept_count = remaining,
            None => {
                tracing::warn!(session = %key, "history changed during archive, live history left untouched");
            }
        }
        self.store.save(key).await?;

        if let Some(path) = &result.archive_path {
            let state_path = self.state_path();
            let key_owned = key.to_string();
            let path_owned = path.clone();
            let (archived, kept_count) = (result.archived_count, result.kept_count);
            tokio::task::spawn_blocking(move || {
                ArchiveState::record(&state_path, &key_owned, &path_owned, archived, kept_count)
            })
            .await
            .map_err(|e| GatewayError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;
        }

        tracing::info!(
            session = %key,
            archived = result.archived_count,
            kept = result.kept_count,
            tokens_before = result.tokens_before,
            tokens_after = result.tokens_after,
            "session archived"
        );
        Ok(result)
    }

    /// 一轮对话后的自动归档：未启用或无需裁剪时返回 None
    pub async fn maybe_archive(&self, key: &str) -> Result<Option<ArchiveResult>> {
        if !self.settings.enabled {
            return Ok(None);
        }
        let result = self.archive_session(key, ArchiveOptions::default()).await?;
        Ok((result.archived_count > 0).then_some(result))
    }

    /// 归档本工作区的全部会话
    pub async fn archive_all(&self, opts: ArchiveOptions) -> Result<Vec<ArchiveResult>> {
        let mut results = Vec::new();
        for key in self.store.list_keys().await {
            if !self.owns_session(&key) {
                continue;
            }
            results.push(self.archive_session(&key, opts).await?);
        }
        Ok(results)
    }

    /// 只归档超过阈值的会话；`force` 在此忽略
    pub async fn archive_over_limit(&self, opts: ArchiveOptions) -> Result<Vec<ArchiveResult>> {
        let opts = ArchiveOptions { force: false, ..opts };
        let results = self.archive_all(opts).await?;
        Ok(results.into_iter().filter(|r| r.over_limit).collect())
    }

    /// 该会话是否已有归档
    pub async fn has_archive(&self, key: &str) -> bool {
        let state_path = self.state_path();
        let archive_dir = self.archive_dir();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            if let Ok(state) = ArchiveState::load(&state_path) {
                if state.sessions.contains_key(&key) {
                    return true;
                }
            }
            list_archive_files(&archive_dir)
                .iter()
                .any(|p| file_matches_session(p, &key))
        })
        .await
        .unwrap_or(false)
    }

    /// 在本工作区归档中检索
    pub async fn recall(
        &self,
        query: &str,
        session_key: Option<&str>,
        top_k: usize,
        max_chars: usize,
    ) -> Result<Vec<RecallHit>> {
        let dir = self.archive_dir();
        let query = query.to_string();
        let session_key = session_key.map(str::to_string);
        let snippet_chars = self.settings.snippet_chars;
        let hits = tokio::task::spawn_blocking(move || {
            recall::recall(
                &dir,
                &RecallRequest {
                    query: &query,
                    session_key: session_key.as_deref(),
                    top_k,
                    max_chars,
                    snippet_chars,
                },
            )
        })
        .await
        .map_err(|e| GatewayError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;
        Ok(hits)
    }
}

/// 写一份新的归档文件；重名时追加序号，永不覆盖已有文件
fn write_new_archive(dir: &Path, stem: &str, markdown: &str) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let timestamp = Utc::now().format("%Y%m%d-%H%M%S-%3f");
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let name = if attempt == 0 {
            format!("{stem}_{timestamp}.md")
        } else {
            format!("{stem}_{timestamp}-{attempt}.md")
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(markdown.as_bytes())?;
                file.sync_all()?;
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("could not allocate archive file name for {stem}"),
    ))
}
