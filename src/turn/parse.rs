//! 模型输出解析：定位首个合法 JSON 对象、把内联文本形式的工具调用转成结构化调用
//!
//! 模型常把结构化答案包在说明文字或 ```json 代码块里，这里只负责把它找出来。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::memory::ToolCall;

static FUNCTION_CALL_RE: OnceLock<Option<Regex>> = OnceLock::new();
static FUNCTION_ARG_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// 从任意文本中找出第一个能完整解析的 JSON 对象
pub fn first_json_object(text: &str) -> Option<Map<String, Value>> {
    text.char_indices()
        .filter(|(_, c)| *c == '{')
        .find_map(|(i, _)| {
            let mut stream = serde_json::Deserializer::from_str(&text[i..]).into_iter::<Value>();
            match stream.next() {
                Some(Ok(Value::Object(map))) => Some(map),
                _ => None,
            }
        })
}

/// 模型没有返回结构化调用、但正文是工具调用时，解析出调用；只接受已绑定的工具名
///
/// 支持两种形式：
/// - JSON：`{"name": "...", "arguments": {...}}`（也接受 `{"tool": "...", "args": {...}}`）
/// - 函数调用：`tool_name(a=1, b="x")`
pub fn parse_inline_tool_call(text: &str, bound: &[&str]) -> Option<ToolCall> {
    let text = text.trim();
    if text.is_empty() || bound.is_empty() {
        return None;
    }
    parse_json_call(text, bound).or_else(|| parse_function_call(text, bound))
}

fn parse_json_call(text: &str, bound: &[&str]) -> Option<ToolCall> {
    let obj = first_json_object(text)?;
    let name = obj
        .get("name")
        .or_else(|| obj.get("tool"))
        .and_then(Value::as_str)?
        .trim();
    if !bound.contains(&name) {
        return None;
    }
    let arguments = match obj.get("arguments").or_else(|| obj.get("args")) {
        Some(Value::String(raw)) => serde_json::from_str(raw).unwrap_or_else(|_| Value::Object(Map::new())),
        Some(v @ Value::Object(_)) => v.clone(),
        _ => Value::Object(Map::new()),
    };
    Some(ToolCall::new(name, arguments))
}

fn parse_function_call(text: &str, bound: &[&str]) -> Option<ToolCall> {
    let call_re = FUNCTION_CALL_RE
        .get_or_init(|| Regex::new(r"(\w+)\((.*?)\)").ok())
        .as_ref()?;
    let arg_re = FUNCTION_ARG_RE
        .get_or_init(|| Regex::new(r#"(\w+)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^,\)]+))"#).ok())
        .as_ref()?;

    let flat: String = text.chars().filter(|c| *c != '\n' && *c != '`').collect();
    let caps = call_re
        .captures_iter(&flat)
        .find(|c| c.get(1).is_some_and(|m| bound.contains(&m.as_str())))?;
    let name = caps.get(1)?.as_str();
    let args_str = caps.get(2).map_or("", |m| m.as_str());

    let mut args = Map::new();
    for arg in arg_re.captures_iter(args_str) {
        let Some(key) = arg.get(1) else { continue };
        let value = if let Some(quoted) = arg.get(2).or_else(|| arg.get(3)) {
            Value::String(quoted.as_str().to_string())
        } else {
            let raw = arg.get(4).map_or("", |m| m.as_str()).trim();
            match raw.parse::<i64>() {
                Ok(n) => Value::from(n),
                Err(_) => Value::String(raw.trim_matches(|c| c == '"' || c == '\'').to_string()),
            }
        };
        args.insert(key.as_str().to_string(), value);
    }
    Some(ToolCall::new(name, Value::Object(args)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_json_object_skips_prose_and_fences() {
        let text = "Sure! {not json} here you go:\n```json\n{\"subtasks\": []}\n```";
        let obj = first_json_object(text).unwrap();
        assert!(obj.contains_key("subtasks"));
        assert!(first_json_object("no braces at all").is_none());
    }

    #[test]
    fn test_json_call_with_string_arguments() {
        let call = parse_inline_tool_call(r#"{"name": "echo", "arguments": "{\"text\": \"hi\"}"}"#, &["echo"]).unwrap();
        assert_eq!(call.name, "echo");
        assert_eq!(call.arguments["text"], "hi");
    }

    #[test]
    fn test_json_call_requires_bound_tool() {
        assert!(parse_inline_tool_call(r#"{"name": "rm_rf", "arguments": {}}"#, &["echo"]).is_none());
        let call = parse_inline_tool_call(r#"{"tool": "echo", "args": {"text": "x"}}"#, &["echo"]).unwrap();
        assert_eq!(call.arguments["text"], "x");
    }

    #[test]
    fn test_function_call_form() {
        let call = parse_inline_tool_call("`ingest_batch(limit=5, mode=\"fast\")`", &["ingest_batch"]).unwrap();
        assert_eq!(call.name, "ingest_batch");
        assert_eq!(call.arguments["limit"], 5);
        assert_eq!(call.arguments["mode"], "fast");
        assert!(parse_inline_tool_call("just call print(x) later", &["echo"]).is_none());
    }
}
