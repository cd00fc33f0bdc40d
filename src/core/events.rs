//! 编排过程事件：供前端（SSE / TUI）展示路由决策、模型调用、工具调用、任务波次

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// 路由决策（tools / retrieval / batch / end）
    Route { step: usize, transition: String },
    /// 正在调用 LLM
    Thinking,
    /// 调用工具
    ToolCall {
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    Observation { tool: String, preview: String },
    /// 工具执行失败
    ToolFailure { tool: String, reason: String },
    /// 多任务规划完成
    PlanReady { tasks: usize },
    /// 开始执行一个波次
    WaveStarted { wave: usize, task_ids: Vec<String> },
    /// 单个子任务结束
    TaskFinished {
        task_id: String,
        role: String,
        status: String,
    },
    /// 本轮因停止请求结束
    Stopped { reason: String },
    /// 最终回复
    MessageDone { text: String },
    /// 错误
    Error { text: String },
}

/// 事件发送端（可选）
pub type EventSender = UnboundedSender<AgentEvent>;

pub(crate) fn send_event(tx: Option<&EventSender>, ev: AgentEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}

/// 截断预览文本（按字符）
pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}
