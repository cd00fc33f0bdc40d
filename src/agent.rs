//! Headless Agent 运行时
//!
//! 对外入口：run_turn（单轮状态机）、run_multi_task_plan（多任务调度）与 handle_input。
//! handle_input 是顶层轮次的起点：先清除停止标记，再按意图选择单轮或多任务路径。

use std::sync::Arc;

use serde::Serialize;

use crate::bus::WorkerPool;
use crate::core::{ConversationState, StopSignal};
use crate::memory::Message;
use crate::tools::ToolRegistry;
use crate::turn::{IntentClassifier, TurnEngine};
use crate::workflow::{MultiTaskOrchestrator, PlanOutcome, PlanReport};

/// handle_input 选择的执行路径
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputPath {
    Turn,
    MultiTask,
}

/// 一次顶层输入的处理结果
#[derive(Debug)]
pub struct InputOutcome {
    pub state: ConversationState,
    pub path: InputPath,
    pub reply: String,
    pub stopped: bool,
    /// 多任务路径的执行报告
    pub plan: Option<PlanReport>,
}

/// Agent 运行时（由 AgentBuilder 构建）
pub struct AgentRuntime {
    pub(crate) engine: TurnEngine,
    pub(crate) orchestrator: MultiTaskOrchestrator,
    pub(crate) classifier: Arc<dyn IntentClassifier>,
    pub(crate) tools: Arc<ToolRegistry>,
    pub(crate) stop: StopSignal,
    pub(crate) pool: Option<Arc<WorkerPool>>,
    pub(crate) system_prompt: Option<String>,
    pub(crate) max_history: usize,
}

impl AgentRuntime {
    /// 停止信号句柄（交给 Ctrl+C 处理器或 stop 命令）
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// 新对话；配置了系统提示词时以 system 消息开头
    pub fn new_conversation(&self) -> ConversationState {
        let mut state = ConversationState::new(Arc::clone(&self.tools));
        if let Some(prompt) = self.system_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            state.push(Message::system(prompt));
        }
        state
    }

    /// 单轮状态机；不清除停止标记
    pub async fn run_turn(&self, state: ConversationState, user_text: &str) -> ConversationState {
        self.engine.run_turn(state, user_text, &self.stop).await
    }

    /// 多任务调度，返回最终文本
    pub async fn run_multi_task_plan(&self, user_text: &str) -> String {
        self.run_multi_task_plan_report(user_text).await.final_text
    }

    pub async fn run_multi_task_plan_report(&self, user_text: &str) -> PlanReport {
        self.orchestrator.run_multi_task_plan(user_text, &self.stop).await
    }

    /// 是否交给多任务调度：多步骤的导入请求（非一次性），或满足规划启发式且不属于委托 / 导入
    pub fn wants_plan(&self, user_text: &str) -> bool {
        let intent = self.classifier.classify(user_text);
        if intent.ingestion {
            return intent.multi_step && !intent.one_shot;
        }
        !intent.delegation && self.classifier.should_plan(user_text)
    }

    /// 顶层轮次入口
    pub async fn handle_input(&self, state: ConversationState, user_text: &str) -> InputOutcome {
        self.stop.clear();

        let (mut state, path, plan) = if self.wants_plan(user_text) {
            tracing::info!("Routing request to multi-task scheduler");
            let mut state = state;
            state.begin_turn(user_text);
            let report = self.run_multi_task_plan_report(user_text).await;
            state.push(Message::assistant(report.final_text.clone()));
            if matches!(report.outcome, PlanOutcome::Stopped { .. }) {
                state.stopped = true;
            }
            (state, InputPath::MultiTask, Some(report))
        } else {
            (self.run_turn(state, user_text).await, InputPath::Turn, None)
        };

        let reply = state.last().map(|m| m.text().to_string()).unwrap_or_default();
        let stopped = state.stopped;
        state.trim_to(self.max_history);
        InputOutcome {
            state,
            path,
            reply,
            stopped,
            plan,
        }
    }

    /// 停止后台 worker 池（若有）
    pub async fn shutdown(&self) {
        if let Some(pool) = &self.pool {
            pool.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::core::AgentBuilder;
    use crate::llm::{ScriptStep, ScriptedLlmClient};

    async fn runtime(llm: ScriptedLlmClient) -> AgentRuntime {
        AgentBuilder::new(AppConfig::default())
            .with_llm(Arc::new(llm))
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_handle_input_clears_stale_stop() {
        let rt = runtime(ScriptedLlmClient::new([ScriptStep::text("hi there")])).await;
        rt.stop_signal().request();
        let out = rt.handle_input(rt.new_conversation(), "hello").await;
        assert_eq!(out.path, InputPath::Turn);
        assert_eq!(out.reply, "hi there");
        assert!(!out.stopped);
    }

    #[tokio::test]
    async fn test_run_turn_respects_existing_stop() {
        let rt = runtime(ScriptedLlmClient::new([ScriptStep::text("unused")])).await;
        rt.stop_signal().request();
        let state = rt.run_turn(rt.new_conversation(), "hello").await;
        assert!(state.stopped);
    }

    #[tokio::test]
    async fn test_path_selection() {
        let rt = runtime(ScriptedLlmClient::new(Vec::new())).await;
        assert!(rt.wants_plan("research rust async then summarize it"));
        assert!(!rt.wants_plan("ingest 5 items then stop"));
        assert!(rt.wants_plan("ingest 5 items and then summarize what was added"));
        assert!(!rt.wants_plan("hello"));
    }
}
