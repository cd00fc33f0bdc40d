//! 协作式停止信号
//!
//! StopSignal 是一个可克隆的原子布尔句柄，随调用链显式传递（不使用进程级全局量）。
//! 只在检查点轮询读取，不会强制打断正在执行的 future；新的顶层轮次开始时清除。

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 默认轮询间隔
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 停止信号：request / clear / is_requested
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// 请求停止（用户 Ctrl+C / stop 命令）
    pub fn request(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            tracing::info!("Stop requested");
        }
    }

    /// 清除停止标记；每个新的顶层轮次开始时调用一次
    pub fn clear(&self) {
        if self.flag.swap(false, Ordering::SeqCst) {
            tracing::debug!("Stop flag cleared");
        }
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// 以 poll 为间隔轮询，观察到停止请求后返回
    pub async fn cancelled(&self, poll: Duration) {
        let mut ticker = tokio::time::interval(poll);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if self.is_requested() {
                return;
            }
        }
    }
}

/// 受停止信号与超时保护的一次挂起调用的结果
#[derive(Debug, PartialEq, Eq)]
pub enum Guarded<T> {
    Completed(T),
    /// 调用前或调用中观察到停止请求
    Cancelled,
    TimedOut,
}

/// 将 fut 与停止轮询、墙钟超时竞争；先完成者胜出，其余分支被丢弃（fut 随之取消）
pub async fn run_guarded<F>(fut: F, stop: &StopSignal, timeout: Duration, poll: Duration) -> Guarded<F::Output>
where
    F: Future,
{
    if stop.is_requested() {
        return Guarded::Cancelled;
    }
    tokio::select! {
        biased;
        _ = stop.cancelled(poll) => Guarded::Cancelled,
        out = fut => Guarded::Completed(out),
        _ = tokio::time::sleep(timeout) => Guarded::TimedOut,
    }
}
