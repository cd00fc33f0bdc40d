//! 规划：让模型把请求拆成带依赖的子任务
//!
//! 提示词中嵌入由 schemars 生成的计划 JSON Schema；解析时容忍前后说明文字与 ``` 代码块，
//! 取第一个合法 JSON 对象。未知角色回退为 Researcher，缺失 id 补为 task_{序号}。

use schemars::{schema_for, JsonSchema};
use serde::Deserialize;

use crate::memory::Message;
use crate::turn::parse::first_json_object;
use crate::workflow::types::{AgentTask, PlanError, WorkerRole};

pub const PLANNER_SYSTEM_PROMPT: &str =
    "You are an orchestrator coordinating multiple specialized workers. You never call tools yourself.";

/// 模型返回的计划
#[derive(Debug, Deserialize, JsonSchema)]
pub struct PlanDocument {
    /// 子任务列表；简单请求返回空列表
    #[serde(default)]
    pub subtasks: Vec<SubtaskSpec>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SubtaskSpec {
    /// 唯一 id，如 task_1
    #[serde(default)]
    pub id: Option<String>,
    /// researcher / coder / analyst / writer / planner / plex_ingester
    #[serde(default, alias = "agent")]
    pub role: Option<String>,
    /// 具体要做什么
    #[serde(default)]
    pub description: String,
    /// 依赖的子任务 id
    #[serde(default, alias = "depends_on")]
    pub dependencies: Vec<String>,
}

/// 计划 JSON Schema（拼入提示词）
pub fn plan_schema_json() -> String {
    let schema = schema_for!(PlanDocument);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// 构造规划请求消息
pub fn plan_messages(user_request: &str) -> Vec<Message> {
    let roles: Vec<&str> = WorkerRole::ALL.iter().map(|r| r.as_str()).collect();
    let prompt = format!(
        "Given this user request: \"{request}\"\n\n\
         Create an execution plan by breaking it into subtasks.\n\n\
         Respond ONLY with JSON matching this schema:\n{schema}\n\n\
         Example:\n{{\"subtasks\": [{{\"id\": \"task_1\", \"role\": \"researcher\", \"description\": \"Detailed task description\", \"dependencies\": []}}]}}\n\n\
         Available roles: {roles}\n\n\
         If this is a simple task that doesn't need multiple workers, respond with:\n{{\"subtasks\": []}}",
        request = user_request,
        schema = plan_schema_json(),
        roles = roles.join(", "),
    );
    vec![Message::system(PLANNER_SYSTEM_PROMPT), Message::user(prompt)]
}

/// 解析模型给出的计划；空列表返回 PlanError::Empty
pub fn parse_plan(text: &str) -> Result<Vec<AgentTask>, PlanError> {
    let object = first_json_object(text).ok_or_else(|| PlanError::Malformed("no JSON object found".into()))?;
    let doc: PlanDocument = serde_json::from_value(serde_json::Value::Object(object))
        .map_err(|e| PlanError::Malformed(e.to_string()))?;
    if doc.subtasks.is_empty() {
        return Err(PlanError::Empty);
    }

    let tasks = doc
        .subtasks
        .into_iter()
        .enumerate()
        .map(|(i, spec)| {
            let id = spec
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| format!("task_{}", i));
            let role = match spec.role.as_deref() {
                Some(name) => name.parse().unwrap_or_else(|_| {
                    tracing::warn!(task = %id, role = %name, "Unknown role, defaulting to researcher");
                    WorkerRole::Researcher
                }),
                None => WorkerRole::Researcher,
            };
            AgentTask::new(id, role, spec.description).with_dependencies(spec.dependencies)
        })
        .collect();
    Ok(tasks)
}
