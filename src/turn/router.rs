//! 轮次路由状态机
//!
//! 每次调用都基于当前对话状态重新计算下一步（TOOLS / RETRIEVAL / BATCH / END），没有隐藏状态；
//! 同一状态连续调用两次得到相同结果。判断顺序固定，取消与闭环条件优先于关键词启发式。

use std::sync::Arc;

use serde::Serialize;

use crate::core::{ConversationState, StopSignal};
use crate::memory::Message;
use crate::turn::intent::IntentClassifier;

/// 路由结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// 执行待处理的工具调用
    Tools,
    /// 转入知识库检索路径
    Retrieval,
    /// 转入批量导入路径
    Batch,
    /// 结束本轮（或交由调用方转多任务规划）
    End,
}

impl Transition {
    pub fn as_str(self) -> &'static str {
        match self {
            Transition::Tools => "tools",
            Transition::Retrieval => "retrieval",
            Transition::Batch => "batch",
            Transition::End => "end",
        }
    }
}

/// 路由器：分类器 + 远程委托工具族前缀
#[derive(Clone)]
pub struct TurnRouter {
    classifier: Arc<dyn IntentClassifier>,
    delegation_prefix: String,
}

impl TurnRouter {
    pub fn new(classifier: Arc<dyn IntentClassifier>, delegation_prefix: impl Into<String>) -> Self {
        Self {
            classifier,
            delegation_prefix: delegation_prefix.into(),
        }
    }

    pub fn classifier(&self) -> &Arc<dyn IntentClassifier> {
        &self.classifier
    }

    fn is_delegation_result(&self, msg: &Message) -> bool {
        msg.tool_name()
            .is_some_and(|name| name.starts_with(&self.delegation_prefix))
    }

    /// 计算下一步
    pub fn route(&self, state: &ConversationState, stop: &StopSignal) -> Transition {
        if stop.is_requested() || state.stopped {
            tracing::debug!("Route: stop requested -> end");
            return Transition::End;
        }

        let turn = state.current_turn();
        let last = state.last();

        // 最近一条工具结果来自远程委托：结束，避免委托循环
        if turn
            .iter()
            .rev()
            .find(|m| m.is_tool_result())
            .is_some_and(|m| self.is_delegation_result(m))
        {
            tracing::debug!("Route: delegation result present -> end");
            return Transition::End;
        }

        if last.is_some_and(Message::has_tool_calls) {
            return Transition::Tools;
        }

        if last.is_some_and(Message::is_tool_result) {
            tracing::warn!("Route: transcript ends with a tool result -> end");
            return Transition::End;
        }

        if let Some(text) = state.last_user_text() {
            let intent = self.classifier.classify(text);

            if intent.delegation {
                let delegated = turn.iter().any(|m| self.is_delegation_result(m));
                return if delegated { Transition::End } else { Transition::Tools };
            }

            if intent.ingestion {
                if state.side_effect_completed {
                    return Transition::End;
                }
                if intent.one_shot || !intent.multi_step {
                    return Transition::Batch;
                }
                tracing::debug!("Route: multi-step ingestion, deferring to planner -> end");
                return Transition::End;
            }

            if intent.explicit_retrieval {
                return Transition::Retrieval;
            }
        }

        if last.is_some_and(Message::has_tool_calls) {
            return Transition::Tools;
        }

        if let Some(msg @ Message::User { .. }) = last {
            let intent = self.classifier.classify(msg.text());
            if intent.general_knowledge && !intent.mentions_media {
                return Transition::Retrieval;
            }
        }

        Transition::End
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ToolCall;
    use crate::tools::ToolRegistry;
    use crate::turn::intent::KeywordClassifier;

    fn router() -> TurnRouter {
        TurnRouter::new(Arc::new(KeywordClassifier::new().unwrap()), "a2a_")
    }

    fn state_with(user: &str) -> ConversationState {
        let mut s = ConversationState::new(Arc::new(ToolRegistry::new()));
        s.begin_turn(user);
        s
    }

    fn call(name: &str, id: &str) -> ToolCall {
        ToolCall::new(name, serde_json::json!({})).with_call_id(id)
    }

    #[test]
    fn test_stop_wins_over_pending_calls() {
        let stop = StopSignal::new();
        let mut s = state_with("hello");
        s.push(Message::assistant_with_calls("", vec![call("echo", "c1")]));
        assert_eq!(router().route(&s, &stop), Transition::Tools);
        stop.request();
        assert_eq!(router().route(&s, &stop), Transition::End);
        stop.clear();
        s.stopped = true;
        assert_eq!(router().route(&s, &stop), Transition::End);
    }

    #[test]
    fn test_delegation_result_closes_loop() {
        let stop = StopSignal::new();
        let mut s = state_with("ask the remote agent for the forecast");
        assert_eq!(router().route(&s, &stop), Transition::Tools);

        let c = call("a2a_send_task", "c1");
        s.push(Message::assistant_with_calls("", vec![c.clone()]));
        s.push(Message::tool_result(&c, "sunny"));
        s.push(Message::assistant_with_calls("", vec![call("a2a_send_task", "c2")]));
        assert_eq!(router().route(&s, &stop), Transition::End);
    }

    #[test]
    fn test_tool_result_last_is_malformed() {
        let stop = StopSignal::new();
        let mut s = state_with("hello");
        let c = call("echo", "c1");
        s.push(Message::assistant_with_calls("", vec![c.clone()]));
        s.push(Message::tool_result(&c, "hi"));
        assert_eq!(router().route(&s, &stop), Transition::End);
    }

    #[test]
    fn test_ingestion_paths() {
        let stop = StopSignal::new();
        let mut s = state_with("ingest 5 items then stop");
        assert_eq!(router().route(&s, &stop), Transition::Batch);
        s.side_effect_completed = true;
        assert_eq!(router().route(&s, &stop), Transition::End);

        let s = state_with("ingest batch");
        assert_eq!(router().route(&s, &stop), Transition::Batch);

        let s = state_with("ingest 5 items and then analyze the genres");
        assert_eq!(router().route(&s, &stop), Transition::End);
    }

    #[test]
    fn test_retrieval_paths() {
        let stop = StopSignal::new();
        assert_eq!(router().route(&state_with("search rag for tokio"), &stop), Transition::Retrieval);
        assert_eq!(router().route(&state_with("What is a borrow checker?"), &stop), Transition::Retrieval);
        assert_eq!(router().route(&state_with("what is on plex tonight"), &stop), Transition::End);
    }

    #[test]
    fn test_general_knowledge_only_while_user_is_last() {
        let stop = StopSignal::new();
        let mut s = state_with("explain lifetimes");
        s.push(Message::assistant("Lifetimes are..."));
        assert_eq!(router().route(&s, &stop), Transition::End);
    }

    #[test]
    fn test_multi_step_research_defers() {
        let stop = StopSignal::new();
        let s = state_with("research rust async runtimes then summarize");
        assert_eq!(router().route(&s, &stop), Transition::End);
    }

    #[test]
    fn test_idempotent() {
        let stop = StopSignal::new();
        for text in ["ingest 5 items then stop", "what is rust", "hello", "use rag please"] {
            let s = state_with(text);
            let r = router();
            assert_eq!(r.route(&s, &stop), r.route(&s, &stop));
        }
    }
}
