//! Mock LLM 客户端（用于测试与本地演示，无需 API）
//!
//! - MockLlmClient：绑定了 echo 工具时把最后一条 User 消息回显为 echo 调用，拿到工具结果后直接回复。
//! - ScriptedLlmClient：按顺序返回预设回复（可带延迟），并记录每次调用，便于断言。
//! - FnLlmClient：用闭包按输入决定回复，适合并发调用（多任务波次）。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, ModelReply};
use crate::memory::{Message, ToolCall};
use crate::tools::ToolSpec;

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message], tools: Option<&[ToolSpec]>) -> Result<ModelReply, LlmError> {
        if let Some(Message::ToolResult { content, .. }) = messages.last() {
            return Ok(ModelReply::text(content.clone()));
        }
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.is_user())
            .map(Message::text)
            .unwrap_or("(no input)");

        let echo_bound = tools.is_some_and(|t| t.iter().any(|s| s.name == "echo"));
        if echo_bound {
            let call = ToolCall::new("echo", serde_json::json!({ "text": format!("Echo from Mock: {last_user}") }));
            Ok(ModelReply::tool_calls(vec![call]))
        } else {
            Ok(ModelReply::text(format!("Echo from Mock: {last_user}")))
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// 预设的一步回复
#[derive(Debug, Clone)]
pub struct ScriptStep {
    pub reply: Result<ModelReply, LlmError>,
    pub delay: Duration,
}

impl ScriptStep {
    pub fn reply(reply: ModelReply) -> Self {
        Self {
            reply: Ok(reply),
            delay: Duration::ZERO,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::reply(ModelReply::text(text))
    }

    pub fn error(err: LlmError) -> Self {
        Self {
            reply: Err(err),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// 一次被记录的调用
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    /// None 表示调用时未绑定工具
    pub tool_names: Option<Vec<String>>,
}

/// 脚本化客户端：依次弹出 ScriptStep；脚本耗尽后返回 fallback
pub struct ScriptedLlmClient {
    steps: Mutex<VecDeque<ScriptStep>>,
    fallback: ModelReply,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl ScriptedLlmClient {
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            fallback: ModelReply::default(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_fallback(mut self, reply: ModelReply) -> Self {
        self.fallback = reply;
        self
    }

    /// 调用记录的共享句柄（客户端被 Arc<dyn LlmClient> 持有后仍可断言）
    pub fn calls_handle(&self) -> Arc<Mutex<Vec<RecordedCall>>> {
        Arc::clone(&self.calls)
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message], tools: Option<&[ToolSpec]>) -> Result<ModelReply, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                messages: messages.to_vec(),
                tool_names: tools.map(|t| t.iter().map(|s| s.name.clone()).collect()),
            });
        }
        let step = self.steps.lock().ok().and_then(|mut s| s.pop_front());
        match step {
            Some(step) => {
                if !step.delay.is_zero() {
                    tokio::time::sleep(step.delay).await;
                }
                step.reply
            }
            None => Ok(self.fallback.clone()),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

type Responder = dyn Fn(&[Message], Option<&[ToolSpec]>) -> Result<ModelReply, LlmError> + Send + Sync;

/// 闭包客户端：回复由输入决定，与调用顺序无关
pub struct FnLlmClient {
    responder: Box<Responder>,
    delay: Duration,
}

impl FnLlmClient {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&[Message], Option<&[ToolSpec]>) -> Result<ModelReply, LlmError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: Duration::ZERO,
        }
    }

    /// 每次调用前等待，模拟网络延迟
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl LlmClient for FnLlmClient {
    async fn complete(&self, messages: &[Message], tools: Option<&[ToolSpec]>) -> Result<ModelReply, LlmError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.responder)(messages, tools)
    }

    fn name(&self) -> &str {
        "fn"
    }
}
