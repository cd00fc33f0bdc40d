//! 消息总线集成测试：优先级出队、重试预算、经总线分派的多任务计划

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;

    use hive::bus::*;
    use hive::config::AppConfig;
    use hive::core::{AgentBuilder, StopSignal};
    use hive::llm::{FnLlmClient, ModelReply, ScriptStep, ScriptedLlmClient};
    use hive::turn::KeywordClassifier;
    use hive::workflow::{
        MultiTaskOrchestrator, PlanBuilder, PlanOutcome, TaskError, WorkerDispatch, WorkerRole,
    };
    use hive::InputPath;

    fn request(priority: Priority) -> MessageEnvelope {
        MessageProtocol::request("planner", "w1", "noop", json!({}), priority)
    }

    #[test]
    fn test_dequeue_follows_priority_not_arrival() {
        let mut router = MessageRouter::new();
        router.register("w1", None);
        let normal = request(Priority::Normal);
        let critical = request(Priority::Critical);
        let low = request(Priority::Low);
        let expected = vec![critical.id.clone(), normal.id.clone(), low.id.clone()];

        for env in [normal, critical, low] {
            router.route(env).unwrap();
        }
        let order: Vec<String> = std::iter::from_fn(|| router.get_next("w1")).map(|e| e.id).collect();
        assert_eq!(order, expected);
        assert_eq!(router.stats().total_routed, 3);
    }

    #[test]
    fn test_three_retries_means_four_attempts() {
        let mut router = MessageRouter::new();
        router.register("w1", None);
        let env = request(Priority::Normal).with_max_retries(3);
        let id = env.id.clone();
        router.route(env).unwrap();

        let mut attempts = 0;
        let mut outcomes = Vec::new();
        while let Some(env) = router.get_next("w1") {
            attempts += 1;
            assert_eq!(env.retry_count, attempts - 1);
            outcomes.push(router.mark_failed(&env.id, "boom"));
        }

        assert_eq!(attempts, 4);
        assert_eq!(
            outcomes[..3],
            [1, 2, 3].map(|attempt| FailureOutcome::Retried {
                attempt,
                worker: "w1".to_string()
            })
        );
        assert_eq!(outcomes[3], FailureOutcome::Dropped);
        assert!(!router.is_pending(&id));
        let stats = router.stats();
        assert_eq!(stats.retries, 3);
        assert_eq!(stats.failed_routes, 1);
        assert_eq!(stats.pending_messages, 0);
    }

    /// 按角色回显并计数的 worker
    #[derive(Default)]
    struct RoleEcho {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl WorkerDispatch for RoleEcho {
        async fn execute(&self, role: WorkerRole, prompt: &str, _stop: &StopSignal) -> Result<String, TaskError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let first = prompt.lines().next().unwrap_or_default();
            Ok(format!("{} handled {}", role, first))
        }
    }

    #[tokio::test]
    async fn test_plan_runs_through_worker_pool() {
        let stop = StopSignal::new();
        let pool = Arc::new(WorkerPool::new(MessageRouter::new(), stop.clone()).with_poll_interval(Duration::from_millis(5)));
        let inner = Arc::new(RoleEcho::default());
        for role in [WorkerRole::Researcher, WorkerRole::Writer] {
            pool.spawn_worker(
                format!("{}_worker", role),
                Some(role.to_string()),
                Arc::new(DispatchWorker::new(role, inner.clone())),
            )
            .await;
        }

        let tasks = PlanBuilder::new()
            .task("r", WorkerRole::Researcher, "find sources")
            .task("w", WorkerRole::Writer, "draft summary")
            .sequential("r", "w")
            .build()
            .unwrap();
        let orchestrator = MultiTaskOrchestrator::new(
            Arc::new(ScriptedLlmClient::new([ScriptStep::text("combined")])),
            Arc::new(RoutedWorkers::new(Arc::clone(&pool))),
            Arc::new(KeywordClassifier::new().unwrap()),
        );
        let report = orchestrator.run_plan("find then draft", tasks, &stop).await;

        assert_eq!(report.outcome, PlanOutcome::Completed);
        assert_eq!(report.final_text, "combined");
        assert_eq!(
            report.tasks[1].result.as_ref().map(|r| r.as_text()),
            Some("writer handled Task: draft summary".to_string())
        );
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);

        let stats = pool.stats().await;
        assert_eq!(stats.total_routed, 2);
        assert_eq!(stats.completed_messages, 2);
        assert_eq!(stats.pending_messages, 0);
        pool.shutdown().await;
    }

    /// 带延迟的 worker，记录同时执行的任务数峰值
    #[derive(Default)]
    struct SlowRole {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl WorkerDispatch for SlowRole {
        async fn execute(&self, role: WorkerRole, _prompt: &str, _stop: &StopSignal) -> Result<String, TaskError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(format!("{} done", role))
        }
    }

    #[tokio::test]
    async fn test_same_role_tasks_in_one_wave_run_in_parallel() {
        let stop = StopSignal::new();
        let pool = Arc::new(WorkerPool::new(MessageRouter::new(), stop.clone()).with_poll_interval(Duration::from_millis(5)));
        let inner = Arc::new(SlowRole::default());
        pool.spawn_worker(
            "researcher_worker",
            Some("researcher".to_string()),
            Arc::new(DispatchWorker::new(WorkerRole::Researcher, inner.clone())),
        )
        .await;

        let tasks = PlanBuilder::new()
            .task("a", WorkerRole::Researcher, "first topic")
            .task("b", WorkerRole::Researcher, "second topic")
            .build()
            .unwrap();
        // 消息超时短于两个任务串行所需时间
        let routed = RoutedWorkers::new(Arc::clone(&pool)).with_retry_policy(0, Duration::from_millis(350));
        let orchestrator = MultiTaskOrchestrator::new(
            Arc::new(ScriptedLlmClient::new([ScriptStep::text("both covered")])),
            Arc::new(routed),
            Arc::new(KeywordClassifier::new().unwrap()),
        );
        let report = orchestrator.run_plan("two topics", tasks, &stop).await;

        assert_eq!(report.outcome, PlanOutcome::Completed);
        assert_eq!(report.waves, vec![vec!["a".to_string(), "b".to_string()]]);
        assert!(report.tasks.iter().all(|t| t.status == hive::workflow::TaskStatus::Completed));
        assert_eq!(inner.peak.load(Ordering::SeqCst), 2);
        assert_eq!(pool.stats().await.timeouts, 0);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_expired_envelope_fails_request_without_waiting_for_deadline() {
        let stop = StopSignal::new();
        let pool = WorkerPool::new(MessageRouter::new(), stop.clone()).with_poll_interval(Duration::from_millis(5));
        let inner = Arc::new(SlowRole::default());
        pool.spawn_worker(
            "researcher_worker",
            Some("researcher".to_string()),
            Arc::new(DispatchWorker::new(WorkerRole::Researcher, inner.clone())),
        )
        .await;

        let stale = MessageProtocol::request(
            "scheduler",
            "researcher_worker",
            "execute_task",
            json!({"prompt": "old news"}),
            Priority::Normal,
        )
        .with_timeout(Duration::from_secs(2))
        .with_max_retries(3)
        .with_timestamp(Utc::now() - chrono::Duration::seconds(10));
        let started = Instant::now();
        let out = pool.request(stale, &stop).await;

        assert_eq!(out, Err(PoolError::Expired));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(inner.peak.load(Ordering::SeqCst), 0);
        assert_eq!(pool.stats().await.timeouts, 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_routed_runtime_answers_multi_step_request() {
        let llm = Arc::new(FnLlmClient::new(|messages, _tools| {
            let prompt = messages.last().map(|m| m.text().to_string()).unwrap_or_default();
            let reply = if prompt.contains("Create an execution plan") {
                r#"{"subtasks": [
                    {"id": "a", "role": "researcher", "description": "look it up"},
                    {"id": "b", "role": "writer", "description": "write it up", "dependencies": ["a"]}
                ]}"#
                .to_string()
            } else if prompt.starts_with("User's original request") {
                "all done".to_string()
            } else {
                "partial".to_string()
            };
            Ok(ModelReply::text(reply))
        }));
        let rt = AgentBuilder::new(AppConfig::default())
            .with_llm(llm)
            .with_routed_workers(true)
            .build()
            .await
            .unwrap();

        let out = rt
            .handle_input(rt.new_conversation(), "look up tokio and then write a note")
            .await;
        rt.shutdown().await;

        assert_eq!(out.path, InputPath::MultiTask);
        assert_eq!(out.reply, "all done");
        let plan = out.plan.unwrap();
        assert_eq!(plan.outcome, PlanOutcome::Completed);
        assert_eq!(plan.waves.len(), 2);
    }
}
