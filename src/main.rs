//! Hive - 多智能体轮次编排引擎
//!
//! 入口：初始化日志、加载配置，用 Mock LLM 与 echo 工具构建运行时，逐行读取 stdin。
//! Ctrl+C 停止当前轮次，1 秒内再按一次或收到 SIGTERM 退出。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use hive::config::{load_config, AppConfig};
use hive::core::{AgentEvent, ShutdownManager, StopSignal};
use hive::llm::MockLlmClient;
use hive::tools::EchoTool;
use hive::{AgentBuilder, InputPath};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = match load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load config, using defaults");
            AppConfig::default()
        }
    };
    let routed = std::env::var("HIVE_ROUTED").is_ok_and(|v| v == "1");

    let stop = StopSignal::new();
    let shutdown = Arc::new(ShutdownManager::new(stop.clone()));
    shutdown.install_signal_handlers();

    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(ev) = event_rx.recv().await {
            if matches!(ev, AgentEvent::MessageDone { .. }) {
                continue;
            }
            if let Ok(json) = serde_json::to_string(&ev) {
                tracing::debug!(event = %json, "agent event");
            }
        }
    });

    let runtime = AgentBuilder::new(cfg)
        .with_llm(Arc::new(MockLlmClient))
        .with_tool(EchoTool)
        .with_events(event_tx)
        .with_stop_signal(stop)
        .with_shutdown_token(shutdown.token())
        .with_routed_workers(routed)
        .build()
        .await
        .context("Failed to build agent runtime")?;

    println!("hive ready. Type a message, 'quit' to exit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut state = runtime.new_conversation();

    loop {
        let line = tokio::select! {
            _ = shutdown.wait_for_shutdown() => break,
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };
        let Some(line) = line else { break };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            break;
        }

        let outcome = runtime.handle_input(state, input).await;
        let tag = match outcome.path {
            InputPath::Turn => "turn",
            InputPath::MultiTask => "plan",
        };
        println!("[{}{}] {}", tag, if outcome.stopped { ", stopped" } else { "" }, outcome.reply);
        state = outcome.state;
    }

    if let Some(reason) = shutdown.reason() {
        tracing::info!(?reason, "Exiting");
    }
    runtime.shutdown().await;
    Ok(())
}
