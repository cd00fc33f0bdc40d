//! 工具执行器
//!
//! 在单次调用超时内执行已注册的工具，把未注册、超时、失败统一映射为 AgentError。
//! 每次调用记录一条 `tool_call` 审计日志（工具名、结果、耗时、参数摘要）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::ToolRegistry;

const ARGS_PREVIEW_CHARS: usize = 200;

#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub async fn execute(&self, tool_name: &str, args: Value) -> Result<String, AgentError> {
        let tool = self.registry.get(tool_name).ok_or_else(|| {
            tracing::warn!(tool = %tool_name, "Unknown tool requested");
            AgentError::ToolNotFound(tool_name.to_string())
        })?;

        let preview = preview(&args);
        let started = Instant::now();
        let result = match timeout(self.timeout, tool.execute(args)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(AgentError::ToolExecutionFailed(e)),
            Err(_) => Err(AgentError::ToolTimeout(tool_name.to_string())),
        };
        let outcome = match &result {
            Ok(_) => "ok",
            Err(AgentError::ToolTimeout(_)) => "timeout",
            Err(_) => "error",
        };
        tracing::info!(
            tool = %tool_name,
            outcome,
            duration_ms = started.elapsed().as_millis() as u64,
            args = %preview,
            "tool_call"
        );
        result
    }
}

fn preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > ARGS_PREVIEW_CHARS {
        format!("{}...", s.chars().take(ARGS_PREVIEW_CHARS).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::tools::Tool;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".into())
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "fail"
        }

        fn description(&self) -> &str {
            "always fails"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            Err("boom".into())
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool);
        registry.register(FailingTool);
        ToolExecutor::new(Arc::new(registry), Duration::from_millis(50))
    }

    #[test]
    fn test_preview_truncates_long_args() {
        let long = serde_json::json!({ "text": "x".repeat(500) });
        assert!(preview(&long).ends_with("..."));
        assert_eq!(preview(&serde_json::json!({})), "{}");
    }

    #[tokio::test]
    async fn test_timeout_and_failure_mapping() {
        let exec = executor();
        assert!(matches!(
            exec.execute("slow", serde_json::json!({})).await,
            Err(AgentError::ToolTimeout(name)) if name == "slow"
        ));
        assert!(matches!(
            exec.execute("fail", serde_json::json!({})).await,
            Err(AgentError::ToolExecutionFailed(msg)) if msg == "boom"
        ));
        assert!(matches!(
            exec.execute("ghost", serde_json::json!({})).await,
            Err(AgentError::ToolNotFound(_))
        ));
    }
}
