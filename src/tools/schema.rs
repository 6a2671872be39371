//! 工具参数 JSON Schema 生成（schemars）
//!
//! 每个内置工具的参数由带类型的结构体描述，schema 与解析共用一份定义。

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

/// read_file 参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadFileArgs {
    /// 相对工作区的文件路径
    pub path: String,
}

/// list_dir 参数
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ListDirArgs {
    /// 相对工作区的目录路径，默认工作区根
    #[serde(default)]
    pub path: Option<String>,
}

/// echo 参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct EchoArgs {
    pub text: String,
}

/// message 参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct MessageArgs {
    /// 发给用户的内容
    pub content: String,
    /// 目标渠道，默认当前渠道
    #[serde(default)]
    pub channel: Option<String>,
    /// 目标会话，默认当前会话
    #[serde(default)]
    pub chat_id: Option<String>,
    /// 附件路径
    #[serde(default)]
    pub attachments: Vec<String>,
}

/// 由参数类型生成 JSON Schema
pub fn parameters_for<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    serde_json::to_value(&schema).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
}

/// 解析工具参数；null 视为空对象
pub fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, String> {
    let args = if args.is_null() { serde_json::json!({}) } else { args };
    serde_json::from_value(args).map_err(|e| format!("Invalid arguments: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_lists_required_fields() {
        let schema = parameters_for::<ReadFileArgs>();
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"]["path"].is_object());
        assert_eq!(schema["required"][0], "path");
    }

    #[test]
    fn test_parse_args() {
        let args: ListDirArgs = parse_args(Value::Null).unwrap();
        assert!(args.path.is_none());
        let err = parse_args::<EchoArgs>(serde_json::json!({"nope": 1})).unwrap_err();
        assert!(err.contains("Invalid arguments"));
    }
}
