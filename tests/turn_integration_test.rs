//! 单轮状态机集成测试：停止信号、批量导入路径与路径选择

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use hive::config::AppConfig;
    use hive::core::{AgentBuilder, ConversationState, StopSignal};
    use hive::llm::{ModelReply, ScriptStep, ScriptedLlmClient};
    use hive::memory::{Message, ToolCall};
    use hive::tools::{Tool, ToolRegistry};
    use hive::turn::model_step::CANCELLED_TEXT;
    use hive::turn::tool_step::STOPPED_TOOL_TEXT;
    use hive::turn::{KeywordClassifier, Transition, TurnRouter};
    use hive::workflow::{PlanOutcome, WorkerRole};
    use hive::InputPath;

    /// 第 n 次执行后请求停止的工具
    struct StopAfter {
        n: usize,
        count: AtomicUsize,
        stop: StopSignal,
    }

    #[async_trait]
    impl Tool for StopAfter {
        fn name(&self) -> &str {
            "counter"
        }

        fn description(&self) -> &str {
            "Counts invocations"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            let seen = self.count.fetch_add(1, Ordering::SeqCst) + 1;
            if seen == self.n {
                self.stop.request();
            }
            Ok(format!("count={}", seen))
        }
    }

    /// 记录参数的批量导入工具
    #[derive(Default)]
    struct FakeIngest {
        args: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl Tool for FakeIngest {
        fn name(&self) -> &str {
            "ingest_batch"
        }

        fn description(&self) -> &str {
            "Ingest the next batch of items"
        }

        async fn execute(&self, args: Value) -> Result<String, String> {
            self.args.lock().unwrap().push(args);
            Ok(json!({
                "ingested": [{"title": "Alien (1979)"}, "Heat (1995)"],
                "remaining": 40,
                "total_ingested": 12
            })
            .to_string())
        }
    }

    fn calls(n: usize) -> Vec<ToolCall> {
        (0..n)
            .map(|i| ToolCall::new("counter", json!({})).with_call_id(format!("c{}", i)))
            .collect()
    }

    #[tokio::test]
    async fn test_stop_before_turn_skips_model() {
        let llm = ScriptedLlmClient::new([ScriptStep::text("never sent")]);
        let recorded = llm.calls_handle();
        let stop = StopSignal::new();
        let rt = AgentBuilder::new(AppConfig::default())
            .with_llm(Arc::new(llm))
            .with_stop_signal(stop.clone())
            .build()
            .await
            .unwrap();

        stop.request();
        let state = rt.run_turn(rt.new_conversation(), "hello").await;
        assert!(state.stopped);
        assert_eq!(state.last().unwrap().text(), CANCELLED_TEXT);
        assert!(recorded.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_mid_batch_truncates_tool_results() {
        let stop = StopSignal::new();
        let tool = Arc::new(StopAfter {
            n: 2,
            count: AtomicUsize::new(0),
            stop: stop.clone(),
        });
        let llm = ScriptedLlmClient::new([ScriptStep::reply(ModelReply::tool_calls(calls(4)))]);
        let recorded = llm.calls_handle();
        let rt = AgentBuilder::new(AppConfig::default())
            .with_llm(Arc::new(llm))
            .with_tool_arc(tool.clone())
            .with_stop_signal(stop)
            .build()
            .await
            .unwrap();

        let state = rt.run_turn(rt.new_conversation(), "count things").await;

        // 第 3 个调用前已请求停止：3 条结果，最后一条是停止标记，第 4 个调用从未执行
        let results: Vec<&Message> = state.current_turn().iter().filter(|m| m.is_tool_result()).collect();
        assert_eq!(results.len(), 3);
        assert_eq!(results[2].text(), STOPPED_TOOL_TEXT);
        assert_eq!(tool.count.load(Ordering::SeqCst), 2);
        assert!(state.stopped);
        assert_eq!(recorded.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ingest_then_stop_runs_one_batch() {
        let ingest = Arc::new(FakeIngest::default());
        let llm = ScriptedLlmClient::new([ScriptStep::text("Ingested two titles.")]);
        let recorded = llm.calls_handle();
        let rt = AgentBuilder::new(AppConfig::default())
            .with_llm(Arc::new(llm))
            .with_tool_arc(ingest.clone())
            .build()
            .await
            .unwrap();

        let out = rt.handle_input(rt.new_conversation(), "ingest 5 items then stop").await;

        assert_eq!(out.path, InputPath::Turn);
        assert!(!out.stopped);
        assert_eq!(out.reply, "Ingested two titles.");
        assert_eq!(*ingest.args.lock().unwrap(), vec![json!({"limit": 5})]);
        let summary = out
            .state
            .messages()
            .iter()
            .find(|m| m.text().starts_with("Successfully ingested 2 items"))
            .expect("batch summary");
        assert!(summary.text().contains("1. Alien (1979)\n2. Heat (1995)"));
        assert!(summary.text().ends_with("Remaining to ingest: 40"));
        assert!(out.state.side_effect_completed);
        assert_eq!(recorded.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_router_ingest_then_stop_is_batch() {
        let router = TurnRouter::new(Arc::new(KeywordClassifier::new().unwrap()), "a2a_");
        let mut state = ConversationState::new(Arc::new(ToolRegistry::new()));
        state.begin_turn("ingest 5 items then stop");
        let stop = StopSignal::new();

        assert_eq!(router.route(&state, &stop), Transition::Batch);
        // 纯函数：重复调用结果一致
        assert_eq!(router.route(&state, &stop), Transition::Batch);

        state.side_effect_completed = true;
        assert_eq!(router.route(&state, &stop), Transition::End);
    }

    #[tokio::test]
    async fn test_router_multi_step_request_ends_for_planner() {
        let router = TurnRouter::new(Arc::new(KeywordClassifier::new().unwrap()), "a2a_");
        let mut state = ConversationState::new(Arc::new(ToolRegistry::new()));
        state.begin_turn("research rust async then summarize it");
        let stop = StopSignal::new();

        assert_eq!(router.route(&state, &stop), Transition::End);
        stop.request();
        assert_eq!(router.route(&state, &stop), Transition::End);
    }

    #[tokio::test]
    async fn test_multi_step_request_goes_to_scheduler() {
        let llm = ScriptedLlmClient::new([
            ScriptStep::text(r#"{"subtasks": []}"#),
            ScriptStep::text("Rust async is built on futures."),
        ]);
        let rt = AgentBuilder::new(AppConfig::default())
            .with_llm(Arc::new(llm))
            .build()
            .await
            .unwrap();

        let out = rt
            .handle_input(rt.new_conversation(), "research rust async then summarize it")
            .await;

        assert_eq!(out.path, InputPath::MultiTask);
        assert_eq!(out.reply, "Rust async is built on futures.");
        let plan = out.plan.expect("plan report");
        assert_eq!(plan.outcome, PlanOutcome::Fallback { role: WorkerRole::Researcher });
        assert!(out.state.last_user_text().is_some());
    }
}
