//! 单轮编排循环
//!
//! 节点：Model / Tools / Retrieval / Batch。边：Model -> route；Tools -> Model；Batch -> Model；Retrieval -> End。
//! 轮次入口先路由一次，Retrieval / Batch 直接进入对应路径，其余从 Model 开始。
//! 步数上限防止模型反复请求工具导致死循环；停止标记只在顶层轮次开始时清除，这里从不清除。

use crate::core::events::send_event;
use crate::core::{AgentEvent, ConversationState, EventSender, StopSignal};
use crate::memory::Message;
use crate::tools::ToolExecutor;
use crate::turn::batch::BatchStep;
use crate::turn::model_step::{ModelStep, CANCELLED_TEXT};
use crate::turn::retrieval::RetrievalStep;
use crate::turn::router::{Transition, TurnRouter};
use crate::turn::tool_step::ToolStep;

/// 单轮最大节点步数
pub const DEFAULT_MAX_STEPS: usize = 12;

pub const STEP_LIMIT_TEXT: &str =
    "I ran into a step limit while processing your request. Here is what I have so far; please narrow the request and try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    Model,
    Tools,
    Retrieval,
    Batch,
}

/// 单轮编排引擎
#[derive(Clone)]
pub struct TurnEngine {
    router: TurnRouter,
    model: ModelStep,
    tools: ToolStep,
    retrieval: RetrievalStep,
    batch: BatchStep,
    max_steps: usize,
    events: Option<EventSender>,
}

impl TurnEngine {
    pub fn new(router: TurnRouter, model: ModelStep) -> Self {
        Self {
            router,
            model,
            tools: ToolStep::default(),
            retrieval: RetrievalStep::new("rag_search", 3),
            batch: BatchStep::new("ingest_batch", 5),
            max_steps: DEFAULT_MAX_STEPS,
            events: None,
        }
    }

    pub fn with_tool_step(mut self, tools: ToolStep) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_retrieval(mut self, retrieval: RetrievalStep) -> Self {
        self.retrieval = retrieval;
        self
    }

    pub fn with_batch(mut self, batch: BatchStep) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn router(&self) -> &TurnRouter {
        &self.router
    }

    pub fn model(&self) -> &ModelStep {
        &self.model
    }

    pub fn tool_step(&self) -> &ToolStep {
        &self.tools
    }

    /// 执行一轮：追加用户消息，驱动状态机直到 End，返回更新后的对话状态
    pub async fn run_turn(
        &self,
        mut state: ConversationState,
        user_text: &str,
        stop: &StopSignal,
    ) -> ConversationState {
        state.begin_turn(user_text);
        tracing::info!(messages = state.len(), "Turn started");

        if stop.is_requested() {
            tracing::info!("Stop already requested, turn cancelled before model call");
            state.push(Message::assistant(CANCELLED_TEXT));
            state.stopped = true;
            self.emit(AgentEvent::Stopped {
                reason: "stop requested before turn".to_string(),
            });
            return state;
        }

        let executor = ToolExecutor::new(state.tools().clone(), self.tools.timeout());
        let mut node = match self.route(&state, stop, 0) {
            Transition::Retrieval => Node::Retrieval,
            Transition::Batch => Node::Batch,
            Transition::Tools | Transition::End => Node::Model,
        };

        let mut step = 0;
        loop {
            step += 1;
            if step > self.max_steps {
                tracing::warn!(max_steps = self.max_steps, "Turn hit step limit");
                state.push(Message::assistant(STEP_LIMIT_TEXT));
                break;
            }
            tracing::debug!(step, node = ?node, "Turn node");

            let next = match node {
                Node::Model => {
                    self.emit(AgentEvent::Thinking);
                    self.model.run(&mut state, stop).await;
                    match self.route(&state, stop, step) {
                        Transition::Tools => Some(Node::Tools),
                        Transition::Retrieval => Some(Node::Retrieval),
                        Transition::Batch => Some(Node::Batch),
                        Transition::End => None,
                    }
                }
                Node::Tools => {
                    let attempted = self.tools.run(&mut state, stop, self.events.as_ref()).await;
                    if state.stopped {
                        None
                    } else if attempted == 0 && state.last().is_some_and(|m| !m.is_user()) {
                        // 没有待执行的调用且已有回复
                        None
                    } else {
                        Some(Node::Model)
                    }
                }
                Node::Batch => {
                    self.batch.run(&mut state, &executor, stop).await;
                    if state.stopped {
                        None
                    } else {
                        Some(Node::Model)
                    }
                }
                Node::Retrieval => {
                    self.retrieval.run(&mut state, &self.model, &executor, stop).await;
                    None
                }
            };

            match next {
                Some(n) => node = n,
                None => break,
            }
        }

        if state.stopped {
            self.emit(AgentEvent::Stopped {
                reason: "turn stopped".to_string(),
            });
        }
        if let Some(last) = state.last() {
            self.emit(AgentEvent::MessageDone {
                text: last.text().to_string(),
            });
        }
        tracing::info!(messages = state.len(), stopped = state.stopped, "Turn finished");
        state
    }

    fn route(&self, state: &ConversationState, stop: &StopSignal, step: usize) -> Transition {
        let t = self.router.route(state, stop);
        tracing::debug!(step, transition = t.as_str(), "Routed");
        self.emit(AgentEvent::Route {
            step,
            transition: t.as_str().to_string(),
        });
        t
    }

    fn emit(&self, ev: AgentEvent) {
        send_event(self.events.as_ref(), ev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;

    use crate::llm::{ModelReply, ScriptStep, ScriptedLlmClient};
    use crate::memory::ToolCall;
    use crate::tools::{EchoTool, ToolRegistry};
    use crate::turn::intent::KeywordClassifier;

    fn engine(llm: ScriptedLlmClient) -> TurnEngine {
        let classifier = Arc::new(KeywordClassifier::new().unwrap());
        TurnEngine::new(TurnRouter::new(classifier, "a2a_"), ModelStep::new(Arc::new(llm)))
    }

    fn state() -> ConversationState {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        ConversationState::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn test_tool_round_trip_then_answer() {
        let llm = ScriptedLlmClient::new([
            ScriptStep::reply(ModelReply::tool_calls(vec![ToolCall::new("echo", json!({"text": "pong"}))])),
            ScriptStep::text("The tool said pong."),
        ]);
        let out = engine(llm).run_turn(state(), "please echo pong", &StopSignal::new()).await;

        let roles: Vec<_> = out.messages().iter().map(Message::role).collect();
        use crate::memory::Role::*;
        assert_eq!(roles, vec![User, Assistant, ToolResult, Assistant]);
        assert_eq!(out.last().unwrap().text(), "The tool said pong.");
        assert!(!out.stopped);
    }

    #[tokio::test]
    async fn test_stop_before_turn_skips_model() {
        let llm = ScriptedLlmClient::new([ScriptStep::text("should not be used")]);
        let calls = llm.calls_handle();
        let stop = StopSignal::new();
        stop.request();
        let out = engine(llm).run_turn(state(), "hello", &stop).await;

        assert!(out.stopped);
        assert_eq!(out.len(), 2);
        assert_eq!(out.last().unwrap().text(), CANCELLED_TEXT);
        assert!(calls.lock().unwrap().is_empty());
        // 停止标记由调用方清除
        assert!(stop.is_requested());
    }

    #[tokio::test]
    async fn test_step_limit() {
        let looping = ModelReply::tool_calls(vec![ToolCall::new("echo", json!({"text": "again"}))]);
        let llm = ScriptedLlmClient::new(Vec::new()).with_fallback(looping);
        let out = engine(llm)
            .with_max_steps(5)
            .run_turn(state(), "loop forever", &StopSignal::new())
            .await;
        assert_eq!(out.last().unwrap().text(), STEP_LIMIT_TEXT);
    }
}
