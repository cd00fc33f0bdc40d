//! 计划构建器
//!
//! 提供流畅的 API 手工构建计划（不经过模型规划），build 时做同样的校验

use crate::workflow::graph;
use crate::workflow::types::{AgentTask, PlanError, TaskId, WorkerRole};

/// 计划构建器
#[derive(Debug, Default)]
pub struct PlanBuilder {
    tasks: Vec<AgentTask>,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加任务
    pub fn task(mut self, id: impl Into<TaskId>, role: WorkerRole, description: impl Into<String>) -> Self {
        self.tasks.push(AgentTask::new(id, role, description));
        self
    }

    /// 设置依赖（所有前置任务都需落定）；任务不存在时忽略
    pub fn depends_on<I, S>(mut self, task_id: &str, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        if let Some(task) = self.tasks.iter_mut().find(|t| t.id == task_id) {
            task.dependencies.extend(deps.into_iter().map(Into::into));
        }
        self
    }

    /// 顺序依赖：to 在 from 之后执行
    pub fn sequential(self, from: &str, to: &str) -> Self {
        self.depends_on(to, [from])
    }

    /// 校验并返回任务列表
    pub fn build(self) -> Result<Vec<AgentTask>, PlanError> {
        graph::validate(&self.tasks)?;
        Ok(self.tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_validates() {
        let tasks = PlanBuilder::new()
            .task("a", WorkerRole::Researcher, "look")
            .task("b", WorkerRole::Writer, "write")
            .sequential("a", "b")
            .build()
            .unwrap();
        assert_eq!(tasks[1].dependencies, vec!["a".to_string()]);

        let err = PlanBuilder::new()
            .task("a", WorkerRole::Coder, "x")
            .depends_on("a", ["missing"])
            .build()
            .unwrap_err();
        assert!(matches!(err, PlanError::DanglingDependency { .. }));
    }
}
