//! Agent 构建器：统一的运行时初始化逻辑
//!
//! 从 AppConfig 读取超时、步数、检索 / 批量工具名、分类规则与调度参数，组装 TurnEngine 与
//! MultiTaskOrchestrator。子任务默认由 LlmWorker 直接执行；with_routed_workers 时每个角色一个总线 worker。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::agent::AgentRuntime;
use crate::bus::{DispatchWorker, MessageRouter, RoutedWorkers, WorkerPool};
use crate::config::AppConfig;
use crate::core::{AgentError, EventSender, StopSignal};
use crate::llm::{LlmClient, MockLlmClient};
use crate::tools::{AllTools, Tool, ToolFilter, ToolRegistry};
use crate::turn::{BatchStep, IntentClassifier, KeywordClassifier, ModelStep, RetrievalStep, ToolStep, TurnEngine, TurnRouter};
use crate::workflow::{LlmWorker, MultiTaskOrchestrator, WorkerDispatch, WorkerRole};

/// Agent 构建器
pub struct AgentBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    tools: ToolRegistry,
    classifier: Option<Arc<dyn IntentClassifier>>,
    filter: Arc<dyn ToolFilter>,
    worker: Option<Arc<dyn WorkerDispatch>>,
    routed: bool,
    events: Option<EventSender>,
    stop: StopSignal,
    shutdown: Option<CancellationToken>,
}

impl AgentBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            tools: ToolRegistry::new(),
            classifier: None,
            filter: Arc::new(AllTools),
            worker: None,
            routed: false,
            events: None,
            stop: StopSignal::new(),
            shutdown: None,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 注册一个工具
    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn with_tool_arc(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.register_arc(tool);
        self
    }

    /// 替换默认的关键词分类器
    pub fn with_classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_tool_filter(mut self, filter: Arc<dyn ToolFilter>) -> Self {
        self.filter = filter;
        self
    }

    /// 自定义子任务执行方式
    pub fn with_worker(mut self, worker: Arc<dyn WorkerDispatch>) -> Self {
        self.worker = Some(worker);
        self
    }

    /// 子任务经消息总线分派给各角色 worker
    pub fn with_routed_workers(mut self, routed: bool) -> Self {
        self.routed = routed;
        self
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// 共享外部停止信号（如信号处理器持有的那一个）
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// 关闭 token 同时结束总线 worker 循环
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    pub async fn build(self) -> Result<AgentRuntime, AgentError> {
        let cfg = self.config;
        let llm = self.llm.unwrap_or_else(|| {
            tracing::warn!("No LLM client configured, using mock LLM");
            Arc::new(MockLlmClient)
        });
        let classifier: Arc<dyn IntentClassifier> = match self.classifier {
            Some(c) => c,
            None => Arc::new(
                KeywordClassifier::from_config(&cfg.classifier)
                    .map_err(|e| AgentError::ConfigError(format!("invalid classifier pattern: {}", e)))?,
            ),
        };
        let tools = Arc::new(self.tools);
        tracing::info!(tools = ?tools.tool_names(), model = %llm.name(), "Building agent runtime");

        let model = ModelStep::new(Arc::clone(&llm))
            .with_filter(self.filter)
            .with_timeout(cfg.llm.request_timeout())
            .with_poll_interval(cfg.llm.poll_interval());
        let tool_timeout = Duration::from_secs(cfg.tools.tool_timeout_secs);

        let mut engine = TurnEngine::new(
            TurnRouter::new(Arc::clone(&classifier), cfg.turn.delegation_prefix.clone()),
            model.clone(),
        )
        .with_tool_step(ToolStep::new(tool_timeout))
        .with_retrieval(RetrievalStep::new(cfg.turn.retrieval_tool.clone(), cfg.turn.retrieval_top_k))
        .with_batch(BatchStep::new(cfg.turn.batch_tool.clone(), cfg.turn.batch_limit))
        .with_max_steps(cfg.turn.max_steps);
        if let Some(tx) = &self.events {
            engine = engine.with_events(tx.clone());
        }

        let direct: Arc<dyn WorkerDispatch> = match self.worker {
            Some(w) => w,
            None => Arc::new(
                LlmWorker::new(model.clone(), Arc::clone(&tools), tool_timeout)
                    .with_scheduler_config(&cfg.scheduler),
            ),
        };

        let (worker, pool): (Arc<dyn WorkerDispatch>, Option<Arc<WorkerPool>>) = if self.routed {
            let router = MessageRouter::new().with_busy_penalty(cfg.bus.busy_penalty);
            let mut pool = WorkerPool::new(router, self.stop.clone())
                .with_poll_interval(Duration::from_millis(cfg.bus.poll_interval_ms));
            if let Some(token) = &self.shutdown {
                pool = pool.with_shutdown_token(token.child_token());
            }
            let pool = Arc::new(pool);
            for role in WorkerRole::ALL {
                let bus_worker = Arc::new(DispatchWorker::new(role, Arc::clone(&direct)));
                pool.spawn_worker(format!("{}_worker", role), Some(role.as_str().to_string()), bus_worker)
                    .await;
            }
            let routed = RoutedWorkers::new(Arc::clone(&pool))
                .with_retry_policy(cfg.bus.max_retries, Duration::from_secs(cfg.bus.message_timeout_secs));
            (Arc::new(routed), Some(pool))
        } else {
            (direct, None)
        };

        let mut orchestrator = MultiTaskOrchestrator::new(llm, worker, Arc::clone(&classifier))
            .with_timeout(cfg.llm.request_timeout())
            .with_poll_interval(cfg.llm.poll_interval());
        if let Some(tx) = self.events {
            orchestrator = orchestrator.with_events(tx);
        }

        Ok(AgentRuntime {
            engine,
            orchestrator,
            classifier,
            tools,
            stop: self.stop,
            pool,
            system_prompt: cfg.app.system_prompt.clone(),
            max_history: cfg.app.max_history,
        })
    }
}
