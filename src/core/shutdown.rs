//! 中断与关闭
//!
//! 第一次 Ctrl+C 只请求停止当前工作（StopSignal），窗口期内再按一次才关闭进程；SIGTERM 直接关闭。
//! 关闭通过 CancellationToken 通知 REPL 与后台 worker 循环。

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::core::StopSignal;

const DEFAULT_QUIT_WINDOW: Duration = Duration::from_secs(1);

/// 关闭原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// 连按两次 Ctrl+C 或 quit 命令
    UserInitiated,
    /// SIGTERM
    Signal,
}

/// 一次中断的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    StopRequested,
    Quit,
}

pub struct ShutdownManager {
    stop: StopSignal,
    token: CancellationToken,
    quit_window: Duration,
    last_interrupt: Mutex<Option<Instant>>,
    reason: Mutex<Option<ShutdownReason>>,
}

impl ShutdownManager {
    pub fn new(stop: StopSignal) -> Self {
        Self {
            stop,
            token: CancellationToken::new(),
            quit_window: DEFAULT_QUIT_WINDOW,
            last_interrupt: Mutex::new(None),
            reason: Mutex::new(None),
        }
    }

    /// 两次中断之间判定为退出的间隔
    pub fn with_quit_window(mut self, window: Duration) -> Self {
        self.quit_window = window;
        self
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 处理一次 Ctrl+C
    pub fn interrupt(&self) -> Interrupt {
        let now = Instant::now();
        let mut last = self.last_interrupt.lock().unwrap_or_else(|e| e.into_inner());
        if last.is_some_and(|t| now.duration_since(t) < self.quit_window) {
            drop(last);
            tracing::info!("Second interrupt, shutting down");
            self.shutdown(ShutdownReason::UserInitiated);
            return Interrupt::Quit;
        }
        *last = Some(now);
        tracing::info!("Interrupt: stopping current work (press again to quit)");
        self.stop.request();
        Interrupt::StopRequested
    }

    /// 关闭：同时请求停止，保证进行中的步骤尽快返回；只记录第一次的原因
    pub fn shutdown(&self, reason: ShutdownReason) {
        {
            let mut slot = self.reason.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_none() {
                tracing::info!(?reason, "Shutdown requested");
                *slot = Some(reason);
            }
        }
        self.stop.request();
        self.token.cancel();
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.reason.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// 启动 Ctrl+C 与 SIGTERM 监听任务
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if manager.interrupt() == Interrupt::Quit {
                    break;
                }
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                        tracing::info!("Received SIGTERM");
                        manager.shutdown(ShutdownReason::Signal);
                    }
                    Err(e) => tracing::warn!(error = %e, "Could not install SIGTERM handler"),
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_interrupt_only_stops() {
        let stop = StopSignal::new();
        let manager = ShutdownManager::new(stop.clone());
        assert_eq!(manager.interrupt(), Interrupt::StopRequested);
        assert!(stop.is_requested());
        assert!(!manager.is_shutdown());

        assert_eq!(manager.interrupt(), Interrupt::Quit);
        assert!(manager.is_shutdown());
        assert_eq!(manager.reason(), Some(ShutdownReason::UserInitiated));
    }

    #[test]
    fn test_interrupts_outside_window_keep_stopping() {
        let stop = StopSignal::new();
        let manager = ShutdownManager::new(stop.clone()).with_quit_window(Duration::ZERO);
        for _ in 0..3 {
            stop.clear();
            assert_eq!(manager.interrupt(), Interrupt::StopRequested);
            assert!(stop.is_requested());
        }
        assert!(!manager.is_shutdown());
    }

    #[tokio::test]
    async fn test_shutdown_keeps_first_reason() {
        let stop = StopSignal::new();
        let manager = ShutdownManager::new(stop.clone());
        let token = manager.token();
        manager.shutdown(ShutdownReason::Signal);
        manager.shutdown(ShutdownReason::UserInitiated);

        assert!(token.is_cancelled());
        assert!(stop.is_requested());
        assert_eq!(manager.reason(), Some(ShutdownReason::Signal));
        manager.wait_for_shutdown().await;
    }
}
