//! 多任务调度引擎
//!
//! 规划 -> 校验 -> 按波次并发执行 -> 汇总。波次之间严格串行；同一波次内的任务并发执行，
//! 各自捕获失败，单个任务失败不会中止计划。每个波次前后检查停止信号；
//! 就绪集为空但仍有未完成任务时判定为依赖死锁，与停止区分报告。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;

use crate::core::events::send_event;
use crate::core::{run_guarded, AgentEvent, EventSender, Guarded, StopSignal};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::turn::intent::IntentClassifier;
use crate::turn::model_step::CANCELLED_TEXT;
use crate::workflow::graph;
use crate::workflow::planner::{parse_plan, plan_messages};
use crate::workflow::types::{
    AgentTask, PlanError, PlanOutcome, PlanReport, TaskError, TaskId, TaskResult, TaskStatus, WorkerRole,
};
use crate::workflow::worker::WorkerDispatch;

const AGGREGATOR_SYSTEM_PROMPT: &str =
    "You are synthesizing results from multiple workers. Create a clear, unified response.";

/// 多任务调度器
pub struct MultiTaskOrchestrator {
    llm: Arc<dyn LlmClient>,
    worker: Arc<dyn WorkerDispatch>,
    classifier: Arc<dyn IntentClassifier>,
    timeout: Duration,
    poll: Duration,
    events: Option<EventSender>,
}

impl MultiTaskOrchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        worker: Arc<dyn WorkerDispatch>,
        classifier: Arc<dyn IntentClassifier>,
    ) -> Self {
        Self {
            llm,
            worker,
            classifier,
            timeout: Duration::from_secs(120),
            poll: crate::core::stop::DEFAULT_POLL_INTERVAL,
            events: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// 规划并执行；规划失败或为空时退回单 worker
    pub async fn run_multi_task_plan(&self, user_request: &str, stop: &StopSignal) -> PlanReport {
        tracing::info!(request = %user_request, "Multi-task execution started");
        if stop.is_requested() {
            return stopped_report(Vec::new(), Vec::new(), CANCELLED_TEXT.to_string());
        }

        let planned = match run_guarded(
            self.llm.complete(&plan_messages(user_request), None),
            stop,
            self.timeout,
            self.poll,
        )
        .await
        {
            Guarded::Cancelled => return stopped_report(Vec::new(), Vec::new(), CANCELLED_TEXT.to_string()),
            Guarded::TimedOut => Err(PlanError::Malformed("planner timed out".into())),
            Guarded::Completed(Err(e)) => Err(PlanError::Malformed(e.to_string())),
            Guarded::Completed(Ok(reply)) => parse_plan(&reply.text),
        };

        match planned.and_then(|tasks| graph::validate(&tasks).map(|_| tasks)) {
            Ok(tasks) => self.run_plan(user_request, tasks, stop).await,
            Err(PlanError::Empty) => {
                tracing::info!("Simple request, using single worker");
                self.run_fallback(user_request, stop).await
            }
            Err(e) => {
                tracing::warn!(error = %e, "Planning failed, using single worker");
                self.run_fallback(user_request, stop).await
            }
        }
    }

    /// 执行一个已校验的计划
    pub async fn run_plan(&self, user_request: &str, mut tasks: Vec<AgentTask>, stop: &StopSignal) -> PlanReport {
        tracing::info!(tasks = tasks.len(), "Executing plan");
        send_event(self.events.as_ref(), AgentEvent::PlanReady { tasks: tasks.len() });
        let mut waves: Vec<Vec<TaskId>> = Vec::new();

        loop {
            if stop.is_requested() {
                return self.stop_plan(tasks, waves);
            }
            let remaining = graph::unfinished(&tasks);
            if remaining.is_empty() {
                break;
            }
            let ready = graph::ready_set(&tasks);
            if ready.is_empty() {
                tracing::error!(remaining = ?remaining, "Dependency deadlock detected");
                let final_text = format!(
                    "Could not finish the plan: tasks {} wait on dependencies that can never complete.",
                    remaining.join(", ")
                );
                return PlanReport {
                    outcome: PlanOutcome::Deadlock { remaining },
                    tasks,
                    waves,
                    final_text,
                };
            }

            let wave_ids: Vec<TaskId> = ready.iter().map(|&i| tasks[i].id.clone()).collect();
            tracing::info!(wave = waves.len() + 1, tasks = ?wave_ids, "Executing wave");
            send_event(
                self.events.as_ref(),
                AgentEvent::WaveStarted {
                    wave: waves.len() + 1,
                    task_ids: wave_ids.clone(),
                },
            );

            let prompts: Vec<(usize, WorkerRole, String)> = ready
                .iter()
                .map(|&i| (i, tasks[i].role, task_prompt(&tasks[i], user_request, &tasks)))
                .collect();
            for &i in &ready {
                tasks[i].status = TaskStatus::Running;
                tasks[i].started_at = Some(Utc::now());
            }

            let results = join_all(prompts.iter().map(|(_, role, prompt)| self.worker.execute(*role, prompt, stop))).await;

            for ((idx, role, _), result) in prompts.iter().zip(results) {
                let task = &mut tasks[*idx];
                match result {
                    Ok(text) => task.finish(TaskStatus::Completed, TaskResult::Output { text }),
                    Err(TaskError::Stopped) => task.finish(TaskStatus::Stopped, TaskResult::Stopped),
                    Err(TaskError::Failed(message)) => {
                        tracing::warn!(task = %task.id, error = %message, "Task failed");
                        task.finish(TaskStatus::Failed, TaskResult::Error { message });
                    }
                }
                send_event(
                    self.events.as_ref(),
                    AgentEvent::TaskFinished {
                        task_id: task.id.clone(),
                        role: role.to_string(),
                        status: format!("{:?}", task.status).to_lowercase(),
                    },
                );
            }
            waves.push(wave_ids);
        }

        if stop.is_requested() {
            return self.stop_plan(tasks, waves);
        }
        self.aggregate(user_request, tasks, waves, stop).await
    }

    async fn aggregate(
        &self,
        user_request: &str,
        tasks: Vec<AgentTask>,
        waves: Vec<Vec<TaskId>>,
        stop: &StopSignal,
    ) -> PlanReport {
        let sections = labelled_results(&tasks);
        let prompt = format!(
            "User's original request: \"{}\"\n\nResults from specialized workers:{}\n\n\
             Synthesize these results into a coherent, final response that directly answers the user's request.\n\
             Focus on clarity and completeness.",
            user_request, sections
        );
        let messages = vec![Message::system(AGGREGATOR_SYSTEM_PROMPT), Message::user(prompt)];

        let final_text = match run_guarded(self.llm.complete(&messages, None), stop, self.timeout, self.poll).await {
            Guarded::Cancelled => return self.stop_plan(tasks, waves),
            Guarded::Completed(Ok(reply)) if !reply.text.trim().is_empty() => reply.text,
            Guarded::Completed(Ok(_)) => {
                tracing::warn!("Aggregation returned no text, returning raw results");
                sections.trim_start().to_string()
            }
            Guarded::Completed(Err(e)) => {
                tracing::error!(error = %e, "Aggregation failed, returning raw results");
                sections.trim_start().to_string()
            }
            Guarded::TimedOut => {
                tracing::error!("Aggregation timed out, returning raw results");
                sections.trim_start().to_string()
            }
        };
        tracing::info!(waves = waves.len(), "Multi-task execution completed");
        PlanReport {
            outcome: PlanOutcome::Completed,
            tasks,
            waves,
            final_text,
        }
    }

    fn stop_plan(&self, mut tasks: Vec<AgentTask>, waves: Vec<Vec<TaskId>>) -> PlanReport {
        for task in tasks.iter_mut().filter(|t| !t.status.is_finished()) {
            task.finish(TaskStatus::Stopped, TaskResult::Stopped);
        }
        let completed = tasks.iter().filter(|t| t.status.is_settled()).count();
        let total = tasks.len();
        tracing::warn!(completed, total, "Multi-task execution stopped by user");
        send_event(
            self.events.as_ref(),
            AgentEvent::Stopped {
                reason: format!("stopped after {} of {} tasks", completed, total),
            },
        );
        stopped_report(tasks, waves, format!("Stopped after completing {} of {} tasks.", completed, total))
    }

    /// 单 worker 回退：按关键词选择角色，调用前后检查停止信号
    async fn run_fallback(&self, user_request: &str, stop: &StopSignal) -> PlanReport {
        let role = self.classifier.fallback_role(user_request);
        tracing::info!(role = %role, "Single-worker fallback");
        let mut task = AgentTask::new("fallback", role, user_request);
        if stop.is_requested() {
            task.finish(TaskStatus::Stopped, TaskResult::Stopped);
            return stopped_report(vec![task], Vec::new(), CANCELLED_TEXT.to_string());
        }

        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        let result = self.worker.execute(role, user_request, stop).await;
        if stop.is_requested() || matches!(result, Err(TaskError::Stopped)) {
            task.finish(TaskStatus::Stopped, TaskResult::Stopped);
            return stopped_report(vec![task], vec![vec!["fallback".to_string()]], CANCELLED_TEXT.to_string());
        }

        let final_text = match result {
            Ok(text) => {
                task.finish(TaskStatus::Completed, TaskResult::Output { text: text.clone() });
                text
            }
            Err(e) => {
                let message = e.to_string();
                task.finish(TaskStatus::Failed, TaskResult::Error { message: message.clone() });
                format!("The {} worker could not complete the request: {}", role, message)
            }
        };
        PlanReport {
            outcome: PlanOutcome::Fallback { role },
            tasks: vec![task],
            waves: vec![vec!["fallback".to_string()]],
            final_text,
        }
    }
}

fn stopped_report(tasks: Vec<AgentTask>, waves: Vec<Vec<TaskId>>, final_text: String) -> PlanReport {
    let completed = tasks.iter().filter(|t| t.status.is_settled()).count();
    PlanReport {
        outcome: PlanOutcome::Stopped {
            completed,
            total: tasks.len(),
        },
        tasks,
        waves,
        final_text,
    }
}

/// 子任务提示词：任务描述、原始请求、依赖任务的结果
fn task_prompt(task: &AgentTask, user_request: &str, all: &[AgentTask]) -> String {
    let mut context = String::new();
    for dep in &task.dependencies {
        if let Some(t) = all.iter().find(|t| &t.id == dep) {
            if let Some(result) = &t.result {
                context.push_str(&format!("\n\nResult from {} ({}):\n{}", t.id, t.role.title(), result.as_text()));
            }
        }
    }
    format!(
        "Task: {}\n\nUser's original request: {}{}\n\nComplete this task using your available tools.",
        task.description, user_request, context
    )
}

/// 按计划顺序拼接带角色标签的结果
fn labelled_results(tasks: &[AgentTask]) -> String {
    tasks
        .iter()
        .filter_map(|t| {
            t.result
                .as_ref()
                .map(|r| format!("\n\n### {} ({}):\n{}", t.role.title(), t.id, r.as_text()))
        })
        .collect()
}
