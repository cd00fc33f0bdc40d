//! 消息信封：优先级、路由策略、内容（带标签联合体）与标准协议构造
//!
//! 同一 worker 的入站队列中，优先级数值小者先出；同优先级按时间戳先后，再按入队顺序。

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type WorkerId = String;

/// 默认重试次数
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// 默认超时
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// 消息优先级（数值越小越先处理）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// 系统关键消息
    Critical = 0,
    /// 紧急请求
    High = 1,
    Normal = 2,
    /// 后台任务
    Low = 3,
    /// 批处理
    Bulk = 4,
}

impl Priority {
    pub const ALL: [Priority; 5] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
        Priority::Bulk,
    ];

    pub fn value(self) -> u8 {
        self as u8
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

/// 路由策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// 发给指定 worker
    Direct,
    /// 发给全部 worker（每份副本新 id）
    Broadcast,
    /// 按注册顺序轮转
    RoundRobin,
    /// 队列长度 + 忙碌惩罚最小者
    LoadBalanced,
    /// 按 metadata.required_skill 匹配角色
    CapabilityBased,
}

/// 协商状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationStatus {
    Proposed,
    Accepted,
    Rejected,
}

/// 信封内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnvelopeContent {
    Request {
        action: String,
        #[serde(default)]
        params: Value,
    },
    Response {
        original_id: String,
        result: String,
        success: bool,
    },
    Negotiation {
        proposal: Value,
        status: NegotiationStatus,
    },
    Broadcast {
        announcement: String,
    },
}

/// 带路由元数据的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub id: String,
    pub from: WorkerId,
    /// None 表示广播
    pub to: Option<WorkerId>,
    pub content: EnvelopeContent,
    pub priority: Priority,
    pub strategy: RoutingStrategy,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout: Duration,
}

impl MessageEnvelope {
    pub fn new(from: impl Into<WorkerId>, content: EnvelopeContent) -> Self {
        Self {
            id: short_id("msg"),
            from: from.into(),
            to: None,
            content,
            priority: Priority::Normal,
            strategy: RoutingStrategy::Direct,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn to(mut self, worker: impl Into<WorkerId>) -> Self {
        self.to = Some(worker.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 要求的角色能力（capability-based 路由读取）
    pub fn with_required_skill(self, skill: impl Into<String>) -> Self {
        self.with_metadata("required_skill", skill)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn required_skill(&self) -> Option<&str> {
        self.metadata.get("required_skill").map(String::as_str)
    }

    /// 自创建起是否已超过 timeout
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.timeout) {
            Ok(limit) => now.signed_duration_since(self.timestamp) > limit,
            Err(_) => false,
        }
    }
}

/// 标准协议消息构造
pub struct MessageProtocol;

impl MessageProtocol {
    /// 请求消息：direct 路由
    pub fn request(
        from: impl Into<WorkerId>,
        to: impl Into<WorkerId>,
        action: impl Into<String>,
        params: Value,
        priority: Priority,
    ) -> MessageEnvelope {
        MessageEnvelope::new(
            from,
            EnvelopeContent::Request {
                action: action.into(),
                params,
            },
        )
        .with_id(short_id("req"))
        .to(to)
        .with_priority(priority)
        .with_metadata("protocol", "request")
    }

    /// 针对某个请求的响应：收发方对调，沿用原优先级
    pub fn response(original: &MessageEnvelope, result: impl Into<String>, success: bool) -> MessageEnvelope {
        let mut env = MessageEnvelope::new(
            original.to.clone().unwrap_or_default(),
            EnvelopeContent::Response {
                original_id: original.id.clone(),
                result: result.into(),
                success,
            },
        )
        .with_id(short_id("res"))
        .to(original.from.clone())
        .with_priority(original.priority)
        .with_metadata("protocol", "response");
        env.metadata.insert("original_id".into(), original.id.clone());
        env
    }

    /// 协商消息，默认高优先级
    pub fn negotiation(from: impl Into<WorkerId>, to: impl Into<WorkerId>, proposal: Value) -> MessageEnvelope {
        MessageEnvelope::new(
            from,
            EnvelopeContent::Negotiation {
                proposal,
                status: NegotiationStatus::Proposed,
            },
        )
        .with_id(short_id("neg"))
        .to(to)
        .with_priority(Priority::High)
        .with_metadata("protocol", "negotiation")
    }

    /// 广播公告，默认低优先级
    pub fn broadcast(from: impl Into<WorkerId>, announcement: impl Into<String>) -> MessageEnvelope {
        MessageEnvelope::new(
            from,
            EnvelopeContent::Broadcast {
                announcement: announcement.into(),
            },
        )
        .with_id(short_id("brd"))
        .with_priority(Priority::Low)
        .with_strategy(RoutingStrategy::Broadcast)
        .with_metadata("protocol", "broadcast")
    }
}

fn short_id(prefix: &str) -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &hex[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_swaps_endpoints() {
        let req = MessageProtocol::request("planner", "coder", "execute_task", serde_json::json!({}), Priority::High);
        assert!(req.id.starts_with("req_"));
        let res = MessageProtocol::response(&req, "ok", true);
        assert_eq!(res.from, "coder");
        assert_eq!(res.to.as_deref(), Some("planner"));
        assert_eq!(res.priority, Priority::High);
        assert_eq!(res.metadata.get("original_id"), Some(&req.id));
    }

    #[test]
    fn test_negotiation_is_high_priority_proposal() {
        let env = MessageProtocol::negotiation("analyst", "writer", serde_json::json!({"split": "by section"}));
        assert!(env.id.starts_with("neg_"));
        assert_eq!(env.priority, Priority::High);
        assert_eq!(env.to.as_deref(), Some("writer"));
        assert!(matches!(
            env.content,
            EnvelopeContent::Negotiation { status: NegotiationStatus::Proposed, .. }
        ));
        let json = serde_json::to_value(&env.content).unwrap();
        assert_eq!(json["type"], "negotiation");
        assert_eq!(json["status"], "proposed");
    }

    #[test]
    fn test_broadcast_defaults() {
        let env = MessageProtocol::broadcast("system", "maintenance");
        assert_eq!(env.to, None);
        assert_eq!(env.strategy, RoutingStrategy::Broadcast);
        assert_eq!(env.priority, Priority::Low);
        assert_eq!(env.max_retries, DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn test_expiry_uses_timestamp() {
        let now = Utc::now();
        let env = MessageProtocol::broadcast("system", "x")
            .with_timeout(Duration::from_secs(10))
            .with_timestamp(now - chrono::Duration::seconds(11));
        assert!(env.is_expired(now));
        let fresh = env.clone().with_timestamp(now);
        assert!(!fresh.is_expired(now));
    }
}
