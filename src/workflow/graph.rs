//! 任务依赖图
//!
//! 计划校验（悬空依赖、重复 id）与波次就绪集计算。依赖「已落定」（完成或失败）即视为满足，
//! 失败任务的错误文本会作为下游任务的上下文。

use std::collections::HashSet;

use crate::workflow::types::{AgentTask, PlanError, TaskId, TaskStatus};

/// 校验计划：id 唯一，依赖只引用同一计划中的任务
pub fn validate(tasks: &[AgentTask]) -> Result<(), PlanError> {
    if tasks.is_empty() {
        return Err(PlanError::Empty);
    }
    let mut ids: HashSet<&str> = HashSet::with_capacity(tasks.len());
    for task in tasks {
        if !ids.insert(task.id.as_str()) {
            return Err(PlanError::DuplicateId(task.id.clone()));
        }
    }
    for task in tasks {
        if let Some(dep) = task.dependencies.iter().find(|d| !ids.contains(d.as_str())) {
            return Err(PlanError::DanglingDependency {
                task: task.id.clone(),
                dependency: dep.clone(),
            });
        }
    }
    Ok(())
}

/// 下一波可执行的任务下标：尚未开始，且所有依赖已落定
pub fn ready_set(tasks: &[AgentTask]) -> Vec<usize> {
    tasks
        .iter()
        .enumerate()
        .filter(|(_, task)| task.status == TaskStatus::Pending)
        .filter(|(_, task)| {
            task.dependencies.iter().all(|dep| {
                tasks
                    .iter()
                    .find(|t| &t.id == dep)
                    .is_some_and(|t| t.status.is_settled())
            })
        })
        .map(|(idx, _)| idx)
        .collect()
}

/// 尚未结束的任务 id
pub fn unfinished(tasks: &[AgentTask]) -> Vec<TaskId> {
    tasks
        .iter()
        .filter(|t| !t.status.is_finished())
        .map(|t| t.id.clone())
        .collect()
}
