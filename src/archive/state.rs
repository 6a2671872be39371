//! 工作区级归档状态文档：`{workspace}/memory/archive_state.json`
//!
//! 读-改-写更新单个会话条目，写入走原子 rename。
//! 没有跨进程锁：同一工作区只应有一个网关进程在归档。

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::Result;
use crate::session::write_atomic;

/// 单个会话的归档记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionArchiveEntry {
    pub last_archived_at: DateTime<Utc>,
    pub last_archive_path: String,
    pub archived_count: usize,
    pub kept_count: usize,
    /// 累计归档条数
    #[serde(default)]
    pub total_archived: usize,
    /// 累计归档文件数
    #[serde(default)]
    pub archive_files: usize,
}

/// 归档状态文档
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchiveState {
    #[serde(default)]
    pub sessions: BTreeMap<String, SessionArchiveEntry>,
}

impl ArchiveState {
    /// 读取状态；文件不存在时为空文档
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read(path) {
            Ok(data) if data.iter().all(u8::is_ascii_whitespace) => Ok(Self::default()),
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &data)?;
        Ok(())
    }

    /// 读-改-写：记录一次归档
    pub fn record(
        path: &Path,
        session_key: &str,
        archive_path: &Path,
        archived_count: usize,
        kept_count: usize,
    ) -> Result<SessionArchiveEntry> {
        let mut state = Self::load(path)?;
        let previous = state.sessions.get(session_key);
        let entry = SessionArchiveEntry {
            last_archived_at: Utc::now(),
            last_archive_path: archive_path.to_string_lossy().to_string(),
            archived_count,
            kept_count,
            total_archived: previous.map_or(0, |p| p.total_archived) + archived_count,
            archive_files: previous.map_or(0, |p| p.archive_files) + 1,
        };
        state.sessions.insert(session_key.to_string(), entry.clone());
        state.save(path)?;
        Ok(entry)
    }
}
