//! 批量导入路径
//!
//! 调用批量工具处理一批条目，把结构化结果整理成一条摘要回复，并置 side_effect_completed，
//! 保证同一轮内不会重复导入。

use serde::Deserialize;
use serde_json::json;

use crate::core::{ConversationState, StopSignal};
use crate::memory::Message;
use crate::tools::ToolExecutor;
use crate::turn::model_step::CANCELLED_TEXT;

pub const UNAVAILABLE_TEXT: &str = "Ingestion tool not available.";

#[derive(Debug, Default, Deserialize)]
struct BatchReport {
    #[serde(default)]
    ingested: Vec<serde_json::Value>,
    #[serde(default)]
    remaining: u64,
    #[serde(default)]
    total_ingested: u64,
    #[serde(default)]
    error: Option<String>,
}

/// 批量导入配置
#[derive(Debug, Clone)]
pub struct BatchStep {
    tool: String,
    limit: usize,
}

impl BatchStep {
    pub fn new(tool: impl Into<String>, limit: usize) -> Self {
        Self {
            tool: tool.into(),
            limit: limit.max(1),
        }
    }

    pub fn tool_name(&self) -> &str {
        &self.tool
    }

    pub async fn run(&self, state: &mut ConversationState, executor: &ToolExecutor, stop: &StopSignal) {
        if stop.is_requested() {
            state.push(Message::assistant(CANCELLED_TEXT));
            state.stopped = true;
            return;
        }
        if !state.tools().contains(&self.tool) {
            tracing::warn!(tool = %self.tool, "Batch tool not registered");
            state.push(Message::assistant(UNAVAILABLE_TEXT));
            state.side_effect_completed = true;
            return;
        }

        tracing::info!(tool = %self.tool, limit = self.limit, "Running ingestion batch");
        let text = match executor.execute(&self.tool, json!({ "limit": self.limit })).await {
            Ok(raw) => summarize(&raw),
            Err(e) => {
                tracing::error!(error = %e, "Ingestion batch failed");
                format!("Ingestion failed: {}", e)
            }
        };
        state.push(Message::assistant(text));
        state.side_effect_completed = true;
        if stop.is_requested() {
            state.stopped = true;
        }
    }
}

fn summarize(raw: &str) -> String {
    let report: BatchReport = match serde_json::from_str(raw) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "Could not parse ingestion result");
            return "Error: Could not parse ingestion result".to_string();
        }
    };
    if let Some(err) = report.error {
        return format!("Ingestion error: {}", err);
    }
    if report.ingested.is_empty() {
        return format!(
            "All items already ingested.\n\nTotal items in knowledge base: {}",
            report.total_ingested
        );
    }

    let items: Vec<String> = report
        .ingested
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let label = match item {
                serde_json::Value::String(s) => s.clone(),
                other => other
                    .get("title")
                    .and_then(|t| t.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| other.to_string()),
            };
            format!("{}. {}", i + 1, label)
        })
        .collect();
    format!(
        "Successfully ingested {} items:\n\n{}\n\nTotal items in knowledge base: {}\nRemaining to ingest: {}",
        report.ingested.len(),
        items.join("\n"),
        report.total_ingested,
        report.remaining
    )
}
