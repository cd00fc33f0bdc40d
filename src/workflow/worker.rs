//! 子任务 worker
//!
//! 调度器只依赖 WorkerDispatch：按角色执行一段提示词，返回文本或 TaskError。
//! LlmWorker 使用角色系统提示词与角色工具子集，在有限轮数内复用模型调用 / 工具执行步骤。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::SchedulerSection;
use crate::core::StopSignal;
use crate::memory::Message;
use crate::tools::{NamedTools, ToolExecutor, ToolFilter, ToolRegistry, ToolSpec};
use crate::turn::model_step::{ModelStep, ModelStepOutcome};
use crate::turn::tool_step::execute_calls;
use crate::workflow::types::{TaskError, WorkerRole};

/// 按角色执行子任务
#[async_trait]
pub trait WorkerDispatch: Send + Sync {
    async fn execute(&self, role: WorkerRole, prompt: &str, stop: &StopSignal) -> Result<String, TaskError>;
}

/// 直接调用模型的 worker
pub struct LlmWorker {
    model: ModelStep,
    executor: ToolExecutor,
    max_tool_rounds: usize,
    role_tools: HashMap<WorkerRole, Vec<String>>,
}

impl LlmWorker {
    pub fn new(model: ModelStep, registry: Arc<ToolRegistry>, tool_timeout: Duration) -> Self {
        Self {
            model,
            executor: ToolExecutor::new(registry, tool_timeout),
            max_tool_rounds: 4,
            role_tools: HashMap::new(),
        }
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    /// 覆盖某个角色的工具名单
    pub fn with_role_tools<I, S>(mut self, role: WorkerRole, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.role_tools.insert(role, tools.into_iter().map(Into::into).collect());
        self
    }

    /// 读取 [scheduler] 配置；无法识别的角色名记录警告后忽略
    pub fn with_scheduler_config(mut self, cfg: &SchedulerSection) -> Self {
        self.max_tool_rounds = cfg.max_tool_rounds;
        for (name, tools) in &cfg.role_tools {
            match name.parse::<WorkerRole>() {
                Ok(role) => {
                    self.role_tools.insert(role, tools.clone());
                }
                Err(e) => tracing::warn!(error = %e, "Ignoring role_tools entry"),
            }
        }
        self
    }

    /// 角色可用的工具
    pub fn tools_for(&self, role: WorkerRole, prompt: &str) -> Vec<ToolSpec> {
        let all = self.executor.registry().specs();
        let filter = match self.role_tools.get(&role) {
            Some(names) => NamedTools::new(names.iter().cloned()),
            None => NamedTools::new(role.default_tools().iter().copied()),
        };
        filter.select_relevant(prompt, &all)
    }
}

#[async_trait]
impl WorkerDispatch for LlmWorker {
    async fn execute(&self, role: WorkerRole, prompt: &str, stop: &StopSignal) -> Result<String, TaskError> {
        if stop.is_requested() {
            return Err(TaskError::Stopped);
        }
        let tools = self.tools_for(role, prompt);
        tracing::info!(role = %role, tools = tools.len(), "Worker started");

        let mut messages = vec![Message::system(role.system_prompt()), Message::user(prompt)];
        let mut round = 0;
        loop {
            // 最后一轮不再绑定工具，迫使模型给出文字结论
            let bound: &[ToolSpec] = if round < self.max_tool_rounds { &tools } else { &[] };
            let (reply, outcome) = self.model.invoke(&messages, bound, stop).await;
            match outcome {
                ModelStepOutcome::Cancelled => return Err(TaskError::Stopped),
                ModelStepOutcome::TimedOut => return Err(TaskError::Failed(reply.text().to_string())),
                ModelStepOutcome::Replied => {}
            }

            if !reply.has_tool_calls() {
                let text = reply.text().trim().to_string();
                if text.is_empty() {
                    return Err(TaskError::Failed(format!("{} worker returned no output", role)));
                }
                tracing::info!(role = %role, rounds = round, "Worker finished");
                return Ok(text);
            }

            let calls = reply.tool_calls().to_vec();
            messages.push(reply);
            let batch = execute_calls(&self.executor, &calls, stop, None).await;
            messages.extend(batch.messages);
            if batch.stopped || stop.is_requested() {
                return Err(TaskError::Stopped);
            }
            round += 1;
        }
    }
}
