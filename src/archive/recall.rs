//! 归档回忆：基于词频的词法检索
//!
//! 每个归档文件的得分 = 各检索词在小写全文中的出现次数之和；零分文件排除。
//! 按得分降序、路径升序排序，取前 top_k；命中片段按字符预算整条准入，
//! 放不下的命中整条跳过，不在片段中间截断，返回内容总长度不超过调用方上限。

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use super::tokenizer::query_terms;
use super::trim::sanitize_key;

/// 单条回忆命中
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecallHit {
    pub path: PathBuf,
    pub score: usize,
    pub text: String,
}

/// 回忆请求参数
#[derive(Debug, Clone)]
pub struct RecallRequest<'a> {
    pub query: &'a str,
    /// 按会话键过滤归档文件（见 file_matches_session）
    pub session_key: Option<&'a str>,
    pub top_k: usize,
    /// 所有命中文本的总字符上限
    pub max_chars: usize,
    /// 单条片段字符上限
    pub snippet_chars: usize,
}

/// 列出归档目录下的 Markdown 文件（排序）
pub fn list_archive_files(archive_dir: &Path) -> Vec<PathBuf> {
    if !archive_dir.is_dir() {
        return Vec::new();
    }
    let pattern = format!(
        "{}/*.md",
        glob::Pattern::escape(&archive_dir.to_string_lossy())
    );
    let mut files: Vec<PathBuf> = match glob::glob(&pattern) {
        Ok(paths) => paths.filter_map(|p| p.ok()).filter(|p| p.is_file()).collect(),
        Err(e) => {
            tracing::warn!(error = %e, "invalid archive glob pattern");
            Vec::new()
        }
    };
    files.sort();
    files
}

fn archive_suffix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{8}-\d{6}-\d{3}(?:-\d+)?\.md$").expect("valid archive name regex"))
}

/// 文件名是否属于该会话：必须是 `{sanitize_key(key)}_{时间戳}[-序号].md`，
/// 前缀相同的其他会话（cli:1 与 cli:10）不算
pub fn file_matches_session(path: &Path, session_key: &str) -> bool {
    let prefix = format!("{}_", sanitize_key(session_key));
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix(prefix.as_str()))
        .map_or(false, |rest| archive_suffix_regex().is_match(rest))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 以首个命中词附近为窗口截取片段，总长度（含省略号）不超过 limit 个字符
fn snippet(text: &str, terms: &[String], limit: usize) -> String {
    let collapsed = collapse_whitespace(text);
    let chars: Vec<char> = collapsed.chars().collect();
    if chars.len() <= limit {
        return collapsed;
    }
    if limit <= 6 {
        return chars[..limit].iter().collect();
    }

    let lower = collapsed.to_lowercase();
    let first_hit = terms
        .iter()
        .filter_map(|t| lower.find(t.as_str()))
        .min()
        .filter(|pos| lower.len() == collapsed.len() && collapsed.is_char_boundary(*pos))
        .map(|pos| collapsed[..pos].chars().count())
        .unwrap_or(0);

    let body = limit - 6;
    let start = first_hit.saturating_sub(body / 4).min(chars.len() - body);
    let end = start + body;

    let mut out = String::new();
    if start > 0 {
        out.push_str("...");
    }
    out.extend(&chars[start..end]);
    if end < chars.len() {
        out.push_str("...");
    }
    out
}

/// 对归档目录执行一次回忆检索
pub fn recall(archive_dir: &Path, req: &RecallRequest<'_>) -> std::io::Result<Vec<RecallHit>> {
    let terms = query_terms(req.query);
    if terms.is_empty() || req.top_k == 0 || req.max_chars == 0 {
        return Ok(Vec::new());
    }

    let mut scored = Vec::new();
    for path in list_archive_files(archive_dir) {
        if let Some(key) = req.session_key {
            if !file_matches_session(&path, key) {
                continue;
            }
        }
        let text = std::fs::read_to_string(&path)?;
        let lower = text.to_lowercase();
        let score: usize = terms.iter().map(|t| lower.matches(t.as_str()).count()).sum();
        if score > 0 {
            scored.push((score, path, text));
        }
    }
    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

    let limit = req.snippet_chars.min(req.max_chars).max(1);
    let mut used = 0;
    let mut hits = Vec::new();
    for (score, path, text) in scored {
        if hits.len() >= req.top_k {
            break;
        }
        let text = snippet(&text, &terms, limit);
        let len = text.chars().count();
        if used + len > req.max_chars {
            continue;
        }
        used += len;
        hits.push(RecallHit { path, score, text });
    }
    Ok(hits)
}

/// 将命中渲染为可注入 system prompt 的段落
pub fn render_hits(hits: &[RecallHit]) -> String {
    let mut out = String::from("## Recalled from archived conversation\n\n");
    for (i, hit) in hits.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, hit.text));
    }
    out
}
