//! 模型调用步骤
//!
//! 一次模型调用作为可取消单元，与停止轮询、墙钟超时竞争；规范化工具调用（补 call id、解析内联调用）；
//! 模型什么都没给时不绑定工具、追加「直接回答」指令重试一次，仍失败则返回固定致歉。
//! 每次调用恰好产出一条 assistant 消息。

use std::sync::Arc;
use std::time::Duration;

use crate::core::{run_guarded, ConversationState, Guarded, StopSignal};
use crate::llm::{LlmClient, LlmError, ModelReply};
use crate::memory::{Message, ToolCall};
use crate::tools::{AllTools, ToolFilter, ToolSpec};
use crate::turn::parse::parse_inline_tool_call;

/// 停止请求时的合成回复
pub const CANCELLED_TEXT: &str = "Operation cancelled by user.";
/// 重试也失败时的固定回复
pub const APOLOGY_TEXT: &str =
    "I'm sorry, I couldn't produce a response to that. Please try rephrasing your request.";
/// 重试时追加的系统指令
pub const ANSWER_DIRECTLY: &str =
    "Answer the user's last message directly in plain text. Do not call any tools.";

/// 超时时的合成回复
pub fn timeout_text(timeout: Duration) -> String {
    format!(
        "The model took too long to respond ({}s). Please try again.",
        timeout.as_secs()
    )
}

/// 一次模型步骤的结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStepOutcome {
    /// 正常回复（含致歉兜底）
    Replied,
    Cancelled,
    TimedOut,
}

impl ModelStepOutcome {
    pub fn is_stopped(self) -> bool {
        !matches!(self, ModelStepOutcome::Replied)
    }
}

/// 模型调用步骤
#[derive(Clone)]
pub struct ModelStep {
    llm: Arc<dyn LlmClient>,
    filter: Arc<dyn ToolFilter>,
    timeout: Duration,
    poll: Duration,
}

impl ModelStep {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            filter: Arc::new(AllTools),
            timeout: Duration::from_secs(120),
            poll: crate::core::stop::DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_filter(mut self, filter: Arc<dyn ToolFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.llm
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll
    }

    /// 对当前对话执行一次模型调用并追加 assistant 消息；取消或超时时置 stopped
    pub async fn run(&self, state: &mut ConversationState, stop: &StopSignal) -> ModelStepOutcome {
        let all = state.tools().specs();
        let query = state.last_user_text().unwrap_or_default();
        let tools = self.filter.select_relevant(query, &all);
        let (msg, outcome) = self.invoke(state.messages(), &tools, stop).await;
        state.push(msg);
        if outcome.is_stopped() {
            state.stopped = true;
        }
        outcome
    }

    /// 不依赖 ConversationState 的调用入口（worker 复用）；返回待追加的消息与结论
    pub async fn invoke(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        stop: &StopSignal,
    ) -> (Message, ModelStepOutcome) {
        let bound = if tools.is_empty() { None } else { Some(tools) };
        tracing::info!(
            model = %self.llm.name(),
            messages = messages.len(),
            tools = tools.len(),
            "Calling LLM"
        );

        match self.guarded(messages, bound, stop).await {
            Guarded::Cancelled => return cancelled(),
            Guarded::TimedOut => return self.timed_out(),
            Guarded::Completed(Ok(reply)) => {
                let reply = normalize(reply, tools);
                if !reply.is_empty() {
                    tracing::info!(tool_calls = reply.tool_calls.len(), "LLM replied");
                    return (
                        Message::assistant_with_calls(reply.text, reply.tool_calls),
                        ModelStepOutcome::Replied,
                    );
                }
                tracing::warn!("LLM returned neither text nor tool calls, retrying without tools");
            }
            Guarded::Completed(Err(e)) => {
                tracing::warn!(error = %e, "LLM call failed, retrying without tools");
            }
        }

        let mut retry: Vec<Message> = messages.to_vec();
        retry.push(Message::system(ANSWER_DIRECTLY));
        match self.guarded(&retry, None, stop).await {
            Guarded::Cancelled => cancelled(),
            Guarded::TimedOut => self.timed_out(),
            Guarded::Completed(Ok(reply)) if !reply.text.trim().is_empty() => {
                (Message::assistant(reply.text), ModelStepOutcome::Replied)
            }
            Guarded::Completed(result) => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "LLM retry failed");
                } else {
                    tracing::error!("LLM retry returned no usable text");
                }
                (Message::assistant(APOLOGY_TEXT), ModelStepOutcome::Replied)
            }
        }
    }

    async fn guarded(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSpec]>,
        stop: &StopSignal,
    ) -> Guarded<Result<ModelReply, LlmError>> {
        run_guarded(self.llm.complete(messages, tools), stop, self.timeout, self.poll).await
    }

    fn timed_out(&self) -> (Message, ModelStepOutcome) {
        tracing::warn!(timeout_secs = self.timeout.as_secs(), "LLM call timed out");
        (Message::assistant(timeout_text(self.timeout)), ModelStepOutcome::TimedOut)
    }
}

fn cancelled() -> (Message, ModelStepOutcome) {
    tracing::info!("LLM call cancelled by stop request");
    (Message::assistant(CANCELLED_TEXT), ModelStepOutcome::Cancelled)
}

/// 补全缺失的 call id；没有结构化调用时尝试解析正文中的内联调用
pub fn normalize(mut reply: ModelReply, tools: &[ToolSpec]) -> ModelReply {
    if reply.tool_calls.is_empty() {
        let bound: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        if let Some(call) = parse_inline_tool_call(&reply.text, &bound) {
            tracing::info!(tool = %call.name, "Parsed inline tool call from model text");
            reply.tool_calls.push(call);
            reply.text.clear();
        }
    }
    for call in reply.tool_calls.iter_mut() {
        if call.call_id.is_empty() {
            call.call_id = new_call_id();
        }
    }
    reply
}

fn new_call_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("call_{}", &hex[..12])
}

/// 构造一条已带 call id 的调用（测试与批量路径用）
pub fn with_fresh_id(call: ToolCall) -> ToolCall {
    if call.call_id.is_empty() {
        call.with_call_id(new_call_id())
    } else {
        call
    }
}
