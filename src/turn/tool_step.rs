//! 工具执行步骤
//!
//! 按顺序执行最后一条 assistant 消息中的工具调用，每个调用前检查停止信号；
//! 追加的工具结果数量等于尝试的调用数量，结果带原 call id。

use std::time::Duration;

use crate::core::events::{preview, send_event};
use crate::core::{AgentEvent, ConversationState, EventSender, StopSignal};
use crate::memory::{Message, ToolCall};
use crate::tools::ToolExecutor;

/// 停止后为当前调用追加的工具结果
pub const STOPPED_TOOL_TEXT: &str = "Execution stopped by user.";

/// 工具执行步骤：持有单次调用超时
#[derive(Debug, Clone, Copy)]
pub struct ToolStep {
    timeout: Duration,
}

impl Default for ToolStep {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// 一批调用的执行结果
#[derive(Debug, Default)]
pub struct ToolBatch {
    pub messages: Vec<Message>,
    /// 批次中途观察到停止请求
    pub stopped: bool,
}

impl ToolStep {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 执行当前待处理的调用并追加结果；返回实际尝试的调用数
    pub async fn run(
        &self,
        state: &mut ConversationState,
        stop: &StopSignal,
        events: Option<&EventSender>,
    ) -> usize {
        let calls: Vec<ToolCall> = match state.last() {
            Some(msg) => msg.tool_calls().to_vec(),
            None => Vec::new(),
        };
        if calls.is_empty() {
            tracing::debug!("Tool step found no pending calls");
            return 0;
        }

        let executor = ToolExecutor::new(state.tools().clone(), self.timeout);
        let batch = execute_calls(&executor, &calls, stop, events).await;
        let attempted = batch.messages.len();
        for msg in batch.messages {
            state.push(msg);
        }
        if batch.stopped {
            state.stopped = true;
        }
        attempted
    }
}

/// 按顺序执行调用；停止请求只截断后续调用，不回滚已追加的结果
pub async fn execute_calls(
    executor: &ToolExecutor,
    calls: &[ToolCall],
    stop: &StopSignal,
    events: Option<&EventSender>,
) -> ToolBatch {
    let mut batch = ToolBatch::default();
    for (idx, call) in calls.iter().enumerate() {
        if stop.is_requested() {
            tracing::info!(
                executed = idx,
                skipped = calls.len() - idx - 1,
                "Tool batch stopped by user"
            );
            batch.messages.push(Message::tool_error(call, STOPPED_TOOL_TEXT));
            batch.stopped = true;
            send_event(
                events,
                AgentEvent::Stopped {
                    reason: format!("stopped before tool {}", call.name),
                },
            );
            break;
        }

        send_event(
            events,
            AgentEvent::ToolCall {
                tool: call.name.clone(),
                args: call.arguments.clone(),
            },
        );
        match executor.execute(&call.name, call.arguments.clone()).await {
            Ok(content) => {
                send_event(
                    events,
                    AgentEvent::Observation {
                        tool: call.name.clone(),
                        preview: preview(&content, 200),
                    },
                );
                batch.messages.push(Message::tool_result(call, content));
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!(tool = %call.name, error = %reason, "Tool call failed");
                send_event(
                    events,
                    AgentEvent::ToolFailure {
                        tool: call.name.clone(),
                        reason: reason.clone(),
                    },
                );
                batch.messages.push(Message::tool_error(call, reason));
            }
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use crate::tools::{EchoTool, Tool, ToolRegistry};

    /// 第 n 次调用时请求停止的工具
    struct StopAfter {
        stop: StopSignal,
        after: usize,
        count: AtomicUsize,
    }

    #[async_trait]
    impl Tool for StopAfter {
        fn name(&self) -> &str {
            "step"
        }

        fn description(&self) -> &str {
            "counts calls"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            let n = self.count.fetch_add(1, Ordering::SeqCst) + 1;
            if n == self.after {
                self.stop.request();
            }
            Ok(format!("call {}", n))
        }
    }

    struct Failing;

    #[async_trait]
    impl Tool for Failing {
        fn name(&self) -> &str {
            "broken"
        }

        fn description(&self) -> &str {
            "always fails"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            Err("disk on fire".into())
        }
    }

    fn calls(name: &str, n: usize) -> Vec<ToolCall> {
        (0..n)
            .map(|i| ToolCall::new(name, json!({"i": i})).with_call_id(format!("c{}", i)))
            .collect()
    }

    #[tokio::test]
    async fn test_results_keep_call_order_and_ids() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let mut state = ConversationState::new(Arc::new(registry));
        state.begin_turn("echo twice");
        state.push(Message::assistant_with_calls(
            "",
            vec![
                ToolCall::new("echo", json!({"text": "one"})).with_call_id("a"),
                ToolCall::new("echo", json!({"text": "two"})).with_call_id("b"),
            ],
        ));

        let attempted = ToolStep::default().run(&mut state, &StopSignal::new(), None).await;
        assert_eq!(attempted, 2);
        let tail = &state.messages()[state.len() - 2..];
        assert!(matches!(&tail[0], Message::ToolResult { call_id, content, .. } if call_id == "a" && content == "one"));
        assert!(matches!(&tail[1], Message::ToolResult { call_id, content, .. } if call_id == "b" && content == "two"));
        assert!(!state.stopped);
    }

    #[tokio::test]
    async fn test_stop_mid_batch_truncates() {
        let stop = StopSignal::new();
        let mut registry = ToolRegistry::new();
        registry.register(StopAfter {
            stop: stop.clone(),
            after: 2,
            count: AtomicUsize::new(0),
        });
        let executor = ToolExecutor::new(Arc::new(registry), Duration::from_secs(5));

        let batch = execute_calls(&executor, &calls("step", 5), &stop, None).await;
        // 两次真实执行 + 第三个调用的停止结果
        assert_eq!(batch.messages.len(), 3);
        assert!(batch.stopped);
        assert_eq!(batch.messages[2].text(), STOPPED_TOOL_TEXT);
        assert!(matches!(&batch.messages[2], Message::ToolResult { is_error: true, call_id, .. } if call_id == "c2"));
    }

    #[tokio::test]
    async fn test_unknown_and_failing_tools_become_error_results() {
        let mut registry = ToolRegistry::new();
        registry.register(Failing);
        let executor = ToolExecutor::new(Arc::new(registry), Duration::from_secs(5));
        let batch = execute_calls(
            &executor,
            &[
                ToolCall::new("missing", json!({})).with_call_id("x"),
                ToolCall::new("broken", json!({})).with_call_id("y"),
            ],
            &StopSignal::new(),
            None,
        )
        .await;

        assert_eq!(batch.messages.len(), 2);
        assert!(batch.messages[0].text().contains("Tool not found: missing"));
        assert!(batch.messages[1].text().contains("disk on fire"));
        assert!(!batch.stopped);
    }

    #[tokio::test]
    async fn test_events_are_emitted() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let executor = ToolExecutor::new(Arc::new(registry), Duration::from_secs(5));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        execute_calls(
            &executor,
            &[ToolCall::new("echo", json!({"text": "hi"})).with_call_id("e")],
            &StopSignal::new(),
            Some(&tx),
        )
        .await;
        assert!(matches!(rx.recv().await, Some(AgentEvent::ToolCall { .. })));
        assert!(matches!(rx.recv().await, Some(AgentEvent::Observation { preview, .. }) if preview == "hi"));
    }
}
