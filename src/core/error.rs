//! Agent 错误类型
//!
//! 预期内的失败（取消、超时、工具失败、任务失败、规划失败）在发生处转成消息或类型化结果；
//! AgentError 只覆盖工具执行与运行时装配。

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    /// 模型请求了未注册的工具
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}
