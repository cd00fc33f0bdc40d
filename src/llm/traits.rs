//! LLM 客户端抽象
//!
//! 模型被视为不透明函数：complete(transcript, tools?) -> {text, tool_calls}。
//! 调用本身可被取消（drop future 即中止），可能返回传输/超时错误。

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::{Message, ToolCall};
use crate::tools::ToolSpec;

/// LLM 调用错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// 一次模型调用的返回
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

impl ModelReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            text: String::new(),
            tool_calls: calls,
        }
    }

    /// 既没有工具调用也没有可用文本
    pub fn is_empty(&self) -> bool {
        self.tool_calls.is_empty() && self.text.trim().is_empty()
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成；tools 为 None 表示不绑定工具
    async fn complete(&self, messages: &[Message], tools: Option<&[ToolSpec]>) -> Result<ModelReply, LlmError>;

    /// 用于日志
    fn name(&self) -> &str {
        "llm"
    }
}
