//! Worker 池
//!
//! 每个注册的 worker 运行一个后台循环：被唤醒（或到轮询间隔）后取空自己的队列，每个信封交给独立的处理任务，
//! 同一 worker 上的请求并发执行。请求结果通过 oneshot 回传给等待者；失败时交给路由器在重试预算内重新投递，
//! 等待者保持不变；出队时已超时的信封立即以 Expired 结束等待。
//! 路由器以 Arc<tokio::sync::Mutex<_>> 共享；关闭通过 CancellationToken。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::bus::envelope::{
    EnvelopeContent, MessageEnvelope, Priority, RoutingStrategy, WorkerId, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT,
};
use crate::bus::router::{FailureOutcome, MessageRouter, RouteError, RouteReceipt, RouterStats};
use crate::core::{run_guarded, Guarded, StopSignal};
use crate::workflow::{TaskError, WorkerDispatch, WorkerRole};

/// 请求动作：执行一个子任务
pub const EXECUTE_TASK: &str = "execute_task";

/// 挂在消息总线上的 worker
#[async_trait]
pub trait BusWorker: Send + Sync {
    async fn handle(&self, action: &str, params: &Value, stop: &StopSignal) -> Result<String, TaskError>;
}

/// 请求失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Routing failed: {0}")]
    Route(#[from] RouteError),

    #[error("Request failed: {0}")]
    Failed(String),

    #[error("Stopped by user")]
    Stopped,

    #[error("Request timed out")]
    TimedOut,

    #[error("Message expired before a worker picked it up")]
    Expired,

    #[error("Worker pool closed")]
    Closed,
}

#[derive(Debug)]
enum Reply {
    Done(String),
    Failed(String),
    Stopped,
    Expired,
}

struct Shared {
    router: Arc<Mutex<MessageRouter>>,
    waiters: Mutex<HashMap<String, oneshot::Sender<Reply>>>,
    wakers: Mutex<HashMap<WorkerId, Arc<Notify>>>,
}

impl Shared {
    async fn wake(&self, workers: &[WorkerId]) {
        let wakers = self.wakers.lock().await;
        for id in workers {
            if let Some(n) = wakers.get(id) {
                n.notify_one();
            }
        }
    }

    async fn resolve(&self, message_id: &str, reply: Reply) {
        if let Some(tx) = self.waiters.lock().await.remove(message_id) {
            let _ = tx.send(reply);
        }
    }
}

/// Worker 池
pub struct WorkerPool {
    shared: Arc<Shared>,
    stop: StopSignal,
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
    poll: Duration,
}

impl WorkerPool {
    pub fn new(router: MessageRouter, stop: StopSignal) -> Self {
        Self {
            shared: Arc::new(Shared {
                router: Arc::new(Mutex::new(router)),
                waiters: Mutex::new(HashMap::new()),
                wakers: Mutex::new(HashMap::new()),
            }),
            stop,
            shutdown: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
            poll: Duration::from_millis(20),
        }
    }

    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    /// 使用外部关闭 token（如 ShutdownManager::token）
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn router(&self) -> Arc<Mutex<MessageRouter>> {
        Arc::clone(&self.shared.router)
    }

    pub async fn stats(&self) -> RouterStats {
        self.shared.router.lock().await.stats()
    }

    /// 注册 worker 并启动其处理循环
    pub async fn spawn_worker(&self, id: impl Into<WorkerId>, role: Option<String>, worker: Arc<dyn BusWorker>) {
        let id = id.into();
        let wake = Arc::new(Notify::new());
        self.shared.wakers.lock().await.insert(id.clone(), Arc::clone(&wake));
        self.shared.router.lock().await.register(id.clone(), role);

        let handle = tokio::spawn(worker_loop(
            Arc::clone(&self.shared),
            id,
            worker,
            wake,
            self.stop.clone(),
            self.shutdown.clone(),
            self.poll,
        ));
        self.handles.lock().await.push(handle);
    }

    /// 投递但不等待结果
    pub async fn route(&self, envelope: MessageEnvelope) -> Result<RouteReceipt, RouteError> {
        let receipt = self.shared.router.lock().await.route(envelope)?;
        self.shared.wake(&receipt.delivered_to).await;
        Ok(receipt)
    }

    /// 投递请求并等待结果；整体时限为信封超时乘以（重试次数 + 1）
    pub async fn request(&self, envelope: MessageEnvelope, stop: &StopSignal) -> Result<String, PoolError> {
        let id = envelope.id.clone();
        let deadline = envelope.timeout.saturating_mul(envelope.max_retries.saturating_add(1));
        let (tx, rx) = oneshot::channel();
        self.shared.waiters.lock().await.insert(id.clone(), tx);

        if let Err(e) = self.route(envelope).await {
            self.shared.waiters.lock().await.remove(&id);
            return Err(PoolError::Route(e));
        }

        match run_guarded(rx, stop, deadline, self.poll).await {
            Guarded::Completed(Ok(Reply::Done(text))) => Ok(text),
            Guarded::Completed(Ok(Reply::Failed(e))) => Err(PoolError::Failed(e)),
            Guarded::Completed(Ok(Reply::Stopped)) => Err(PoolError::Stopped),
            Guarded::Completed(Ok(Reply::Expired)) => Err(PoolError::Expired),
            Guarded::Completed(Err(_)) => Err(PoolError::Closed),
            Guarded::Cancelled => {
                self.forget(&id).await;
                Err(PoolError::Stopped)
            }
            Guarded::TimedOut => {
                tracing::warn!(message = %id, "Request timed out waiting for a worker");
                self.forget(&id).await;
                Err(PoolError::TimedOut)
            }
        }
    }

    async fn forget(&self, message_id: &str) {
        self.shared.waiters.lock().await.remove(message_id);
        self.shared.router.lock().await.abandon(message_id);
    }

    /// 停止全部 worker 循环并等待退出
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker loop panicked");
            }
        }
        // 剩余等待者收到 Closed
        self.shared.waiters.lock().await.clear();
        tracing::info!("Worker pool shut down");
    }
}

async fn worker_loop(
    shared: Arc<Shared>,
    id: WorkerId,
    worker: Arc<dyn BusWorker>,
    wake: Arc<Notify>,
    stop: StopSignal,
    shutdown: CancellationToken,
    poll: Duration,
) {
    tracing::info!(worker = %id, "Worker loop started");
    let in_flight = Arc::new(AtomicUsize::new(0));
    let mut handlers = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = wake.notified() => {}
            _ = tokio::time::sleep(poll) => {}
            Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!(worker = %id, error = %e, "Message handler panicked");
                }
            }
        }

        loop {
            let (next, expired) = {
                let mut router = shared.router.lock().await;
                let next = router.get_next(&id);
                if next.is_some() && in_flight.fetch_add(1, Ordering::SeqCst) == 0 {
                    router.set_busy(&id, true);
                }
                (next, router.take_expired())
            };
            for message_id in expired {
                shared.resolve(&message_id, Reply::Expired).await;
            }
            let Some(envelope) = next else { break };
            handlers.spawn(handle_envelope(
                Arc::clone(&shared),
                id.clone(),
                Arc::clone(&worker),
                envelope,
                stop.clone(),
                Arc::clone(&in_flight),
            ));
        }
    }
    handlers.shutdown().await;
    tracing::info!(worker = %id, "Worker loop stopped");
}

/// 处理单个信封并更新账本；worker 上最后一个在途信封结束时清除忙碌标记
async fn handle_envelope(
    shared: Arc<Shared>,
    id: WorkerId,
    worker: Arc<dyn BusWorker>,
    envelope: MessageEnvelope,
    stop: StopSignal,
    in_flight: Arc<AtomicUsize>,
) {
    let outcome = match &envelope.content {
        EnvelopeContent::Request { action, params } => worker.handle(action, params, &stop).await,
        other => {
            tracing::debug!(worker = %id, message = %envelope.id, content = ?other, "Acknowledged message");
            Ok(String::new())
        }
    };

    let mut router = shared.router.lock().await;
    if in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
        router.set_busy(&id, false);
    }
    match outcome {
        Ok(text) => {
            router.mark_complete(&envelope.id, text.clone());
            drop(router);
            shared.resolve(&envelope.id, Reply::Done(text)).await;
        }
        Err(TaskError::Stopped) => {
            router.abandon(&envelope.id);
            drop(router);
            shared.resolve(&envelope.id, Reply::Stopped).await;
        }
        Err(TaskError::Failed(e)) => {
            let failure = router.mark_failed(&envelope.id, &e);
            drop(router);
            match failure {
                FailureOutcome::Retried { worker: next, .. } => shared.wake(&[next]).await,
                FailureOutcome::Dropped | FailureOutcome::NotPending => {
                    shared.resolve(&envelope.id, Reply::Failed(e)).await;
                }
            }
        }
    }
}

/// 把 WorkerDispatch 挂到总线上：处理 execute_task 请求
pub struct DispatchWorker {
    role: WorkerRole,
    inner: Arc<dyn WorkerDispatch>,
}

impl DispatchWorker {
    pub fn new(role: WorkerRole, inner: Arc<dyn WorkerDispatch>) -> Self {
        Self { role, inner }
    }
}

#[async_trait]
impl BusWorker for DispatchWorker {
    async fn handle(&self, action: &str, params: &Value, stop: &StopSignal) -> Result<String, TaskError> {
        if action != EXECUTE_TASK {
            return Err(TaskError::Failed(format!("Unsupported action: {}", action)));
        }
        let prompt = params.get("prompt").and_then(Value::as_str).unwrap_or_default();
        self.inner.execute(self.role, prompt, stop).await
    }
}

/// 通过消息总线分派子任务：按角色做 capability-based 路由
pub struct RoutedWorkers {
    pool: Arc<WorkerPool>,
    sender: WorkerId,
    priority: Priority,
    max_retries: u32,
    timeout: Duration,
}

impl RoutedWorkers {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self {
            pool,
            sender: "scheduler".to_string(),
            priority: Priority::Normal,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// 单条信封的重试次数与超时
    pub fn with_retry_policy(mut self, max_retries: u32, timeout: Duration) -> Self {
        self.max_retries = max_retries;
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl WorkerDispatch for RoutedWorkers {
    async fn execute(&self, role: WorkerRole, prompt: &str, stop: &StopSignal) -> Result<String, TaskError> {
        let envelope = MessageEnvelope::new(
            self.sender.clone(),
            EnvelopeContent::Request {
                action: EXECUTE_TASK.to_string(),
                params: json!({ "role": role.as_str(), "prompt": prompt }),
            },
        )
        .with_priority(self.priority)
        .with_strategy(RoutingStrategy::CapabilityBased)
        .with_required_skill(role.as_str())
        .with_max_retries(self.max_retries)
        .with_timeout(self.timeout);

        match self.pool.request(envelope, stop).await {
            Ok(text) => Ok(text),
            Err(PoolError::Stopped) => Err(TaskError::Stopped),
            Err(e) => Err(TaskError::Failed(e.to_string())),
        }
    }
}
