//! 演示工具：原样返回 text 参数（REPL 与 MockLlmClient 使用）

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::Tool;

#[derive(Debug, Default, Clone, Copy)]
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the given text unchanged."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "text": { "type": "string", "description": "Text to return" } },
            "required": ["text"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        match args.get("text") {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Ok(other.to_string()),
            None => Err("missing required argument: text".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_requires_text() {
        assert_eq!(EchoTool.execute(json!({"text": "hi"})).await, Ok("hi".to_string()));
        assert_eq!(EchoTool.execute(json!({"text": 3})).await, Ok("3".to_string()));
        assert!(EchoTool.execute(json!({})).await.is_err());
    }
}
