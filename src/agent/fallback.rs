//! 确定性兜底意图
//!
//! 少量明确的请求（列目录、读文件、ping）直接映射到工具调用与模板回复，不经过模型。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Value};

use crate::tools::ToolResult;

/// 命中的兜底意图
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackIntent {
    pub name: &'static str,
    pub tool: &'static str,
    pub args: Value,
}

fn list_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:ls|list files|列出文件)(?:\s+(?:in\s+)?(\S+))?\s*$")
            .expect("valid list regex")
    })
}

fn read_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:cat|read file|读取文件)\s+(\S+)\s*$").expect("valid read regex")
    })
}

fn ping_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*ping[.!?]?\s*$").expect("valid ping regex"))
}

/// 快速规则匹配（不调用模型）
pub fn match_intent(input: &str) -> Option<FallbackIntent> {
    if let Some(caps) = list_re().captures(input) {
        let args = match caps.get(1) {
            Some(p) => json!({ "path": p.as_str() }),
            None => json!({}),
        };
        return Some(FallbackIntent {
            name: "list_files",
            tool: "list_dir",
            args,
        });
    }
    if let Some(caps) = read_re().captures(input) {
        return Some(FallbackIntent {
            name: "read_file",
            tool: "read_file",
            args: json!({ "path": &caps[1] }),
        });
    }
    if ping_re().is_match(input) {
        return Some(FallbackIntent {
            name: "ping",
            tool: "echo",
            args: json!({ "text": "pong" }),
        });
    }
    None
}

/// 用工具结果填充模板回复
pub fn render_reply(intent: &FallbackIntent, result: &ToolResult) -> String {
    if result.is_error {
        return format!("Sorry, {} failed: {}", intent.tool, result.for_llm);
    }
    let path = intent.args.get("path").and_then(Value::as_str);
    match intent.name {
        "list_files" => format!(
            "Files in {}:\n{}",
            path.unwrap_or("the workspace"),
            result.for_llm
        ),
        "read_file" => format!("Contents of {}:\n\n{}", path.unwrap_or("file"), result.for_llm),
        _ => result.for_llm.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_intents() {
        let ls = match_intent("ls").unwrap();
        assert_eq!(ls.tool, "list_dir");
        assert_eq!(ls.args, json!({}));

        let ls = match_intent("List files in notes").unwrap();
        assert_eq!(ls.args, json!({"path": "notes"}));

        let cat = match_intent("cat README.md").unwrap();
        assert_eq!(cat.tool, "read_file");
        assert_eq!(cat.args, json!({"path": "README.md"}));

        assert_eq!(match_intent("Ping!").unwrap().tool, "echo");
        assert!(match_intent("please list files and explain them").is_none());
        assert!(match_intent("cat").is_none());
    }

    #[test]
    fn test_render_reply() {
        let cat = match_intent("read file a.txt").unwrap();
        assert_eq!(
            render_reply(&cat, &ToolResult::ok("hello")),
            "Contents of a.txt:\n\nhello"
        );
        let err = render_reply(&cat, &ToolResult::error("path not found"));
        assert!(err.starts_with("Sorry, read_file failed"));
    }
}
