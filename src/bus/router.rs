//! 优先级消息路由器
//!
//! 维护 worker 目录与每个 worker 的优先级队列，按路由策略投递信封；
//! 跟踪 pending / completed 账本，失败时在重试预算内重新路由，超时信封在出队时丢弃并计数。
//! 方法为同步 `&mut self`，多任务共享时由调用方包在 `tokio::sync::Mutex` 中。

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::bus::envelope::{MessageEnvelope, Priority, RoutingStrategy, WorkerId};

/// 忙碌 worker 的负载惩罚
pub const DEFAULT_BUSY_PENALTY: usize = 100;

/// 路由失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("Direct routing requires a recipient")]
    MissingRecipient,

    #[error("Worker not found: {0}")]
    UnknownWorker(WorkerId),

    #[error("No workers registered")]
    NoWorkers,
}

/// 已注册 worker 的目录项
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerInfo {
    pub id: WorkerId,
    /// 声明的角色，capability-based 路由按此匹配
    pub role: Option<String>,
    pub busy: bool,
}

/// 成功路由的回执：实际投递到的 worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteReceipt {
    pub delivered_to: Vec<WorkerId>,
}

/// mark_failed 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// 已重新路由；attempt 为本次重试序号（1 起）
    Retried { attempt: u32, worker: WorkerId },
    /// 重试耗尽或重新路由失败，永久丢弃
    Dropped,
    /// 不在 pending 账本中
    NotPending,
}

/// 路由统计（仅用于观测，不参与控制决策）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub total_routed: u64,
    pub failed_routes: u64,
    pub retries: u64,
    pub timeouts: u64,
    pub pending_messages: usize,
    pub completed_messages: usize,
    pub registered_workers: usize,
}

/// 单个 worker 队列状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub queue_size: usize,
    pub pending: usize,
    pub priorities: BTreeMap<Priority, usize>,
}

/// 已完成账本项
#[derive(Debug, Clone)]
pub struct CompletedEntry {
    pub envelope: MessageEnvelope,
    pub result: String,
    pub completed_at: DateTime<Utc>,
}

/// 队列元素：反转比较，使 BinaryHeap 弹出 (priority, timestamp, seq) 最小者
#[derive(Debug)]
struct Queued {
    seq: u64,
    envelope: MessageEnvelope,
}

impl Queued {
    fn key(&self) -> (Priority, DateTime<Utc>, u64) {
        (self.envelope.priority, self.envelope.timestamp, self.seq)
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

/// 消息路由器
#[derive(Debug)]
pub struct MessageRouter {
    /// 注册顺序即轮转顺序
    workers: Vec<WorkerInfo>,
    queues: HashMap<WorkerId, BinaryHeap<Queued>>,
    pending: HashMap<String, MessageEnvelope>,
    completed: HashMap<String, CompletedEntry>,
    /// get_next 丢弃的超时信封 id，等待 take_expired 取走
    expired: Vec<String>,
    round_robin_index: usize,
    busy_penalty: usize,
    seq: u64,
    stats: RouterStats,
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageRouter {
    pub fn new() -> Self {
        Self {
            workers: Vec::new(),
            queues: HashMap::new(),
            pending: HashMap::new(),
            completed: HashMap::new(),
            expired: Vec::new(),
            round_robin_index: 0,
            busy_penalty: DEFAULT_BUSY_PENALTY,
            seq: 0,
            stats: RouterStats::default(),
        }
    }

    pub fn with_busy_penalty(mut self, penalty: usize) -> Self {
        self.busy_penalty = penalty;
        self
    }

    /// 注册 worker；重复注册只更新角色
    pub fn register(&mut self, id: impl Into<WorkerId>, role: Option<String>) {
        let id = id.into();
        if let Some(existing) = self.workers.iter_mut().find(|w| w.id == id) {
            existing.role = role;
            return;
        }
        tracing::info!(worker = %id, role = ?role, "Registered worker");
        self.queues.entry(id.clone()).or_default();
        self.workers.push(WorkerInfo { id, role, busy: false });
    }

    /// 注销 worker；其队列中未投递的信封一并移出 pending
    pub fn unregister(&mut self, id: &str) {
        let before = self.workers.len();
        self.workers.retain(|w| w.id != id);
        if self.workers.len() == before {
            return;
        }
        if let Some(queue) = self.queues.remove(id) {
            for q in queue {
                self.pending.remove(&q.envelope.id);
            }
        }
        tracing::info!(worker = %id, "Unregistered worker");
    }

    pub fn set_busy(&mut self, id: &str, busy: bool) {
        if let Some(w) = self.workers.iter_mut().find(|w| w.id == id) {
            w.busy = busy;
        }
    }

    pub fn workers(&self) -> &[WorkerInfo] {
        &self.workers
    }

    pub fn queue_len(&self, id: &str) -> usize {
        self.queues.get(id).map_or(0, BinaryHeap::len)
    }

    /// 按信封的路由策略投递
    pub fn route(&mut self, envelope: MessageEnvelope) -> Result<RouteReceipt, RouteError> {
        self.stats.total_routed += 1;
        let id = envelope.id.clone();
        let result = match envelope.strategy {
            RoutingStrategy::Direct => self.route_direct(envelope),
            RoutingStrategy::Broadcast => self.route_broadcast(envelope),
            RoutingStrategy::RoundRobin => self.route_round_robin(envelope),
            RoutingStrategy::LoadBalanced => self.route_load_balanced(envelope),
            RoutingStrategy::CapabilityBased => self.route_capability(envelope),
        };
        if let Err(e) = &result {
            self.stats.failed_routes += 1;
            tracing::warn!(message = %id, error = %e, "Routing failed");
        }
        result
    }

    fn route_direct(&mut self, envelope: MessageEnvelope) -> Result<RouteReceipt, RouteError> {
        let to = envelope.to.clone().ok_or(RouteError::MissingRecipient)?;
        if !self.workers.iter().any(|w| w.id == to) {
            return Err(RouteError::UnknownWorker(to));
        }
        tracing::debug!(message = %envelope.id, worker = %to, priority = ?envelope.priority, "Routed message");
        self.seq += 1;
        self.pending.insert(envelope.id.clone(), envelope.clone());
        self.queues.entry(to.clone()).or_default().push(Queued { seq: self.seq, envelope });
        Ok(RouteReceipt { delivered_to: vec![to] })
    }

    fn route_broadcast(&mut self, envelope: MessageEnvelope) -> Result<RouteReceipt, RouteError> {
        if self.workers.is_empty() {
            return Err(RouteError::NoWorkers);
        }
        let targets: Vec<WorkerId> = self.workers.iter().map(|w| w.id.clone()).collect();
        let mut delivered = Vec::with_capacity(targets.len());
        for worker in targets {
            let mut copy = envelope.clone();
            copy.id = format!("{}_{}", envelope.id, worker);
            copy.to = Some(worker);
            copy.strategy = RoutingStrategy::Direct;
            delivered.extend(self.route_direct(copy)?.delivered_to);
        }
        tracing::debug!(message = %envelope.id, workers = delivered.len(), "Broadcast message");
        Ok(RouteReceipt { delivered_to: delivered })
    }

    fn route_round_robin(&mut self, mut envelope: MessageEnvelope) -> Result<RouteReceipt, RouteError> {
        if self.workers.is_empty() {
            return Err(RouteError::NoWorkers);
        }
        let selected = self.workers[self.round_robin_index % self.workers.len()].id.clone();
        self.round_robin_index = self.round_robin_index.wrapping_add(1);
        envelope.to = Some(selected);
        self.route_direct(envelope)
    }

    fn route_load_balanced(&mut self, mut envelope: MessageEnvelope) -> Result<RouteReceipt, RouteError> {
        let selected = self
            .workers
            .iter()
            .min_by_key(|w| self.queue_len(&w.id) + if w.busy { self.busy_penalty } else { 0 })
            .map(|w| w.id.clone())
            .ok_or(RouteError::NoWorkers)?;
        envelope.to = Some(selected);
        self.route_direct(envelope)
    }

    /// 角色匹配 required_skill 的 worker 中选队列最短者；无匹配或未声明技能时退回负载均衡
    fn route_capability(&mut self, mut envelope: MessageEnvelope) -> Result<RouteReceipt, RouteError> {
        let selected = envelope.required_skill().and_then(|skill| {
            self.workers
                .iter()
                .filter(|w| w.role.as_deref() == Some(skill))
                .min_by_key(|w| self.queue_len(&w.id))
                .map(|w| w.id.clone())
        });
        match selected {
            Some(worker) => {
                envelope.to = Some(worker);
                self.route_direct(envelope)
            }
            None => {
                tracing::debug!(
                    message = %envelope.id,
                    skill = ?envelope.required_skill(),
                    "No capable worker, falling back to load balancing"
                );
                self.route_load_balanced(envelope)
            }
        }
    }

    /// 弹出该 worker 最高优先级、最早的信封；已超时的信封丢弃并计数
    pub fn get_next(&mut self, worker: &str) -> Option<MessageEnvelope> {
        let now = Utc::now();
        let queue = self.queues.get_mut(worker)?;
        while let Some(Queued { envelope, .. }) = queue.pop() {
            if envelope.is_expired(now) {
                tracing::warn!(message = %envelope.id, worker = %worker, "Message timed out");
                self.stats.timeouts += 1;
                self.pending.remove(&envelope.id);
                self.expired.push(envelope.id);
                continue;
            }
            return Some(envelope);
        }
        None
    }

    /// 取走自上次调用以来因超时被丢弃的信封 id
    pub fn take_expired(&mut self) -> Vec<String> {
        std::mem::take(&mut self.expired)
    }

    /// 关闭 pending 账本项，写入 completed
    pub fn mark_complete(&mut self, message_id: &str, result: impl Into<String>) -> bool {
        match self.pending.remove(message_id) {
            Some(envelope) => {
                self.completed.insert(
                    message_id.to_string(),
                    CompletedEntry {
                        envelope,
                        result: result.into(),
                        completed_at: Utc::now(),
                    },
                );
                true
            }
            None => false,
        }
    }

    /// 失败：重试预算内以 retry_count + 1 重新路由（同一策略），否则永久丢弃
    pub fn mark_failed(&mut self, message_id: &str, error: &str) -> FailureOutcome {
        let Some(mut envelope) = self.pending.remove(message_id) else {
            return FailureOutcome::NotPending;
        };
        if envelope.retry_count >= envelope.max_retries {
            tracing::error!(
                message = %message_id,
                retries = envelope.max_retries,
                error = %error,
                "Message failed permanently"
            );
            self.stats.failed_routes += 1;
            return FailureOutcome::Dropped;
        }
        envelope.retry_count += 1;
        self.stats.retries += 1;
        let attempt = envelope.retry_count;
        tracing::info!(
            message = %message_id,
            attempt,
            max = envelope.max_retries,
            "Retrying message"
        );
        match self.route(envelope) {
            Ok(receipt) => FailureOutcome::Retried {
                attempt,
                worker: receipt.delivered_to.into_iter().next().unwrap_or_default(),
            },
            Err(_) => FailureOutcome::Dropped,
        }
    }

    /// 放弃一条 pending 信封，不重试（停止请求时使用）
    pub fn abandon(&mut self, message_id: &str) -> bool {
        if self.pending.remove(message_id).is_some() {
            tracing::info!(message = %message_id, "Message abandoned");
            self.stats.failed_routes += 1;
            true
        } else {
            false
        }
    }

    pub fn is_pending(&self, message_id: &str) -> bool {
        self.pending.contains_key(message_id)
    }

    pub fn completed(&self, message_id: &str) -> Option<&CompletedEntry> {
        self.completed.get(message_id)
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            pending_messages: self.pending.len(),
            completed_messages: self.completed.len(),
            registered_workers: self.workers.len(),
            ..self.stats.clone()
        }
    }

    /// 每个 worker 的队列长度、pending 数与各优先级计数
    pub fn queue_status(&self) -> BTreeMap<WorkerId, QueueStatus> {
        self.queues
            .iter()
            .map(|(worker, queue)| {
                let mut priorities: BTreeMap<Priority, usize> = Priority::ALL.iter().map(|p| (*p, 0)).collect();
                let mut pending = 0;
                for q in queue.iter() {
                    *priorities.entry(q.envelope.priority).or_insert(0) += 1;
                    if self.pending.contains_key(&q.envelope.id) {
                        pending += 1;
                    }
                }
                (
                    worker.clone(),
                    QueueStatus {
                        queue_size: queue.len(),
                        pending,
                        priorities,
                    },
                )
            })
            .collect()
    }

    /// 清理完成时间早于 max_age 的账本项，返回清理条数
    pub fn clear_old_messages(&mut self, max_age: Duration) -> usize {
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        let now = Utc::now();
        let before = self.completed.len();
        self.completed
            .retain(|_, entry| now.signed_duration_since(entry.completed_at) <= max_age);
        let removed = before - self.completed.len();
        if removed > 0 {
            tracing::debug!(removed, "Cleaned up old messages");
        }
        removed
    }
}
