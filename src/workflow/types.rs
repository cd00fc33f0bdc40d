//! 多任务计划类型定义
//!
//! 定义子任务、worker 角色、任务状态与结果、计划错误与执行报告等核心数据类型

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type TaskId = String;

/// worker 专长角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    /// 检索与信息收集
    Researcher,
    /// 编写代码
    Coder,
    /// 数据分析
    Analyst,
    /// 写作与整理表述
    Writer,
    /// 组织任务 / 待办
    Planner,
    /// 批量导入知识库
    #[serde(alias = "plex_ingester")]
    Ingester,
}

impl WorkerRole {
    pub const ALL: [WorkerRole; 6] = [
        WorkerRole::Researcher,
        WorkerRole::Coder,
        WorkerRole::Analyst,
        WorkerRole::Writer,
        WorkerRole::Planner,
        WorkerRole::Ingester,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WorkerRole::Researcher => "researcher",
            WorkerRole::Coder => "coder",
            WorkerRole::Analyst => "analyst",
            WorkerRole::Writer => "writer",
            WorkerRole::Planner => "planner",
            WorkerRole::Ingester => "ingester",
        }
    }

    /// 汇总段落标题用
    pub fn title(self) -> &'static str {
        match self {
            WorkerRole::Researcher => "Researcher",
            WorkerRole::Coder => "Coder",
            WorkerRole::Analyst => "Analyst",
            WorkerRole::Writer => "Writer",
            WorkerRole::Planner => "Planner",
            WorkerRole::Ingester => "Ingester",
        }
    }

    /// 角色系统提示词
    pub fn system_prompt(self) -> &'static str {
        match self {
            WorkerRole::Researcher => {
                "You are a Researcher agent focused on gathering accurate information.\n\
                 Always use your available tools to look things up. Never make up information."
            }
            WorkerRole::Coder => {
                "You are a Coder agent focused on writing quality code.\n\
                 Use tools when you need to look up code examples or documentation."
            }
            WorkerRole::Analyst => {
                "You are an Analyst agent focused on data analysis and insights.\n\
                 Use tools to gather data before analyzing."
            }
            WorkerRole::Writer => {
                "You are a Writer agent focused on clear communication.\n\
                 Use tools to gather information before writing."
            }
            WorkerRole::Planner => {
                "You are a Planner agent focused on organizing tasks.\n\
                 Use the todo tools to list and create tasks."
            }
            WorkerRole::Ingester => {
                "You are an Ingester agent that loads new items into the knowledge base.\n\
                 For a simple request use the batch ingestion tool in one call.\n\
                 Never make up item ids; only use ids returned by your tools."
            }
        }
    }

    /// 默认可用工具名
    pub fn default_tools(self) -> &'static [&'static str] {
        match self {
            WorkerRole::Researcher => &["rag_search", "search_entries", "search_semantic", "get_weather"],
            WorkerRole::Coder => &["rag_search"],
            WorkerRole::Analyst | WorkerRole::Writer => &["rag_search", "search_entries"],
            WorkerRole::Planner => &["list_todo_items", "add_todo_item"],
            WorkerRole::Ingester => &["find_unprocessed", "ingest_items", "ingest_batch", "ingest_stats", "rag_search"],
        }
    }
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 无法识别的角色名
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for WorkerRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "researcher" => Ok(WorkerRole::Researcher),
            "coder" => Ok(WorkerRole::Coder),
            "analyst" => Ok(WorkerRole::Analyst),
            "writer" => Ok(WorkerRole::Writer),
            "planner" => Ok(WorkerRole::Planner),
            "ingester" | "plex_ingester" => Ok(WorkerRole::Ingester),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// 等待依赖满足
    Pending,
    /// 正在执行
    Running,
    /// 已完成
    Completed,
    /// 失败（结果中记录错误）
    Failed,
    /// 因停止请求未执行
    Stopped,
}

impl TaskStatus {
    /// 已有结论（完成或失败），可以解锁依赖它的任务
    pub fn is_settled(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// 不会再被调度
    pub fn is_finished(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Stopped)
    }
}

/// 任务结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskResult {
    Output { text: String },
    Error { message: String },
    Stopped,
}

impl TaskResult {
    /// 供依赖上下文与汇总使用的文本
    pub fn as_text(&self) -> String {
        match self {
            TaskResult::Output { text } => text.clone(),
            TaskResult::Error { message } => format!("Error: {message}"),
            TaskResult::Stopped => "Stopped before completion.".to_string(),
        }
    }
}

/// 计划中的子任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub id: TaskId,
    pub role: WorkerRole,
    pub description: String,
    pub dependencies: Vec<TaskId>,
    pub status: TaskStatus,
    pub result: Option<TaskResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl AgentTask {
    pub fn new(id: impl Into<TaskId>, role: WorkerRole, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            description: description.into(),
            dependencies: Vec::new(),
            status: TaskStatus::Pending,
            result: None,
            started_at: None,
            ended_at: None,
        }
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub(crate) fn finish(&mut self, status: TaskStatus, result: TaskResult) {
        self.status = status;
        self.result = Some(result);
        self.ended_at = Some(Utc::now());
    }
}

/// 计划被拒绝的原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("Plan has no subtasks")]
    Empty,

    #[error("Malformed plan: {0}")]
    Malformed(String),

    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    DanglingDependency { task: TaskId, dependency: TaskId },

    #[error("Duplicate task id: {0}")]
    DuplicateId(TaskId),
}

/// 单个 worker 的执行失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    #[error("Stopped by user")]
    Stopped,
}

/// 多任务执行的最终结论
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlanOutcome {
    /// 全部任务完成（含部分失败）并已汇总
    Completed,
    /// 因停止请求中断
    Stopped { completed: usize, total: usize },
    /// 剩余任务的依赖永远无法满足
    Deadlock { remaining: Vec<TaskId> },
    /// 规划为空或失败，改由单个 worker 执行
    Fallback { role: WorkerRole },
}

/// run_multi_task_plan 的完整报告
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub outcome: PlanOutcome,
    pub tasks: Vec<AgentTask>,
    /// 每个波次执行的任务 id
    pub waves: Vec<Vec<TaskId>>,
    pub final_text: String,
}
