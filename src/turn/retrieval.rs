//! 知识库检索路径
//!
//! 以最近的用户问题调用检索工具，取前 top_k 个文本片段作为上下文，
//! 在用户问题前插入一条 system 上下文后做一次不绑定工具的模型调用。该路径结束后直接 End。

use serde_json::{json, Value};

use crate::core::{ConversationState, StopSignal};
use crate::memory::Message;
use crate::tools::ToolExecutor;
use crate::turn::model_step::{ModelStep, ModelStepOutcome, CANCELLED_TEXT};

pub const UNAVAILABLE_TEXT: &str = "Knowledge base search is not available.";
pub const NO_RESULTS_TEXT: &str = "I couldn't find any relevant information in the knowledge base.";

/// 检索路径配置
#[derive(Debug, Clone)]
pub struct RetrievalStep {
    tool: String,
    top_k: usize,
}

impl RetrievalStep {
    pub fn new(tool: impl Into<String>, top_k: usize) -> Self {
        Self {
            tool: tool.into(),
            top_k: top_k.max(1),
        }
    }

    pub fn tool_name(&self) -> &str {
        &self.tool
    }

    pub async fn run(
        &self,
        state: &mut ConversationState,
        model: &ModelStep,
        executor: &ToolExecutor,
        stop: &StopSignal,
    ) -> ModelStepOutcome {
        let query = state.last_user_text().unwrap_or_default().to_string();
        if !state.tools().contains(&self.tool) {
            tracing::warn!(tool = %self.tool, "Retrieval tool not registered");
            state.push(Message::assistant(UNAVAILABLE_TEXT));
            return ModelStepOutcome::Replied;
        }

        if stop.is_requested() {
            tracing::info!("Stop requested before knowledge base search");
            state.push(Message::assistant(CANCELLED_TEXT));
            state.stopped = true;
            return ModelStepOutcome::Cancelled;
        }

        tracing::info!(tool = %self.tool, "Searching knowledge base");
        let raw = match executor.execute(&self.tool, json!({ "query": query })).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(error = %e, "Knowledge base search failed");
                state.push(Message::assistant(format!("Error searching knowledge base: {}", e)));
                return ModelStepOutcome::Replied;
            }
        };

        let chunks = extract_chunks(&raw, self.top_k);
        if chunks.is_empty() {
            state.push(Message::assistant(NO_RESULTS_TEXT));
            return ModelStepOutcome::Replied;
        }
        tracing::debug!(chunks = chunks.len(), "Retrieved context chunks");

        let context = chunks.join("\n\n");
        let mut augmented: Vec<Message> = state.messages().to_vec();
        let at = state.current_turn_start().unwrap_or(augmented.len());
        augmented.insert(
            at,
            Message::system(format!("Use this context to answer the question:\n\n{}", context)),
        );

        let (msg, outcome) = model.invoke(&augmented, &[], stop).await;
        state.push(msg);
        if outcome.is_stopped() {
            state.stopped = true;
        }
        outcome
    }
}

/// 解析检索工具返回的 `{"results": [{"text": ...}]}`；非 JSON 时整体视为一个片段
fn extract_chunks(raw: &str, top_k: usize) -> Vec<String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => value
            .get("results")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("text").and_then(Value::as_str))
                    .filter(|t| !t.trim().is_empty())
                    .take(top_k)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        Err(_) if !raw.trim().is_empty() => vec![raw.trim().to_string()],
        Err(_) => Vec::new(),
    }
}
