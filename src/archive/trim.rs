//! 裁剪边界计算与归档 Markdown 渲染

use chrono::{DateTime, Utc};

use crate::session::{Message, Role};

/// 截断标记
const TRUNCATION_MARKER: &str = "\n\n…[truncated]";

/// token 估算：字符数 / 4（廉价近似，前后比较口径一致即可）
pub fn estimate_tokens(messages: &[Message]) -> usize {
    let chars: usize = messages.iter().map(|m| m.content.chars().count()).sum();
    chars / 4
}

/// 计算保留区起点：从尾部向前数用户消息，数满 keep_user_pairs 条时的下标即候选边界；
/// 再钳制到不晚于 len - min_tail_messages，保证至少保留 min_tail_messages 条。
/// 返回值之前的消息可归档，之后的保留在会话中。
pub fn calculate_keep_start(
    messages: &[Message],
    keep_user_pairs: usize,
    min_tail_messages: usize,
) -> usize {
    let len = messages.len();
    if len <= min_tail_messages {
        return 0;
    }
    let max_start = len - min_tail_messages;

    let candidate = if keep_user_pairs == 0 {
        len
    } else {
        let mut seen = 0;
        let mut boundary = 0;
        for (i, m) in messages.iter().enumerate().rev() {
            if m.is_user() {
                seen += 1;
                if seen == keep_user_pairs {
                    boundary = i;
                    break;
                }
            }
        }
        boundary
    };

    candidate.min(max_start)
}

/// 可写入归档的消息：仅非空的 user / assistant
pub fn archivable_entries(messages: &[Message]) -> Vec<&Message> {
    messages
        .iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant))
        .filter(|m| !m.content.trim().is_empty())
        .collect()
}

fn cap_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{head}{TRUNCATION_MARKER}")
}

/// 渲染归档 Markdown：头部（会话键、归档时间、条数）+ 按序编号的 "### N. User|Assistant" 段
pub fn render_archive(
    session_key: &str,
    archived_at: DateTime<Utc>,
    entries: &[&Message],
    max_message_chars: usize,
) -> String {
    let mut out = String::new();
    out.push_str("# Session Archive\n\n");
    out.push_str(&format!("- Session: {session_key}\n"));
    out.push_str(&format!("- Archived at: {}\n", archived_at.to_rfc3339()));
    out.push_str(&format!("- Messages: {}\n\n", entries.len()));
    for (i, m) in entries.iter().enumerate() {
        let who = if m.role == Role::User { "User" } else { "Assistant" };
        out.push_str(&format!(
            "### {}. {}\n\n{}\n\n",
            i + 1,
            who,
            cap_chars(m.content.trim(), max_message_chars)
        ));
    }
    out
}

/// 会话键转文件名片段：非字母数字、'-'、'_' 一律替换为 '_'
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
