//! 优雅退出
//!
//! 监听 SIGINT/SIGTERM（Windows 下为 Ctrl+C），通知 HTTP 服务停止接收新连接，
//! 随后在超时时间内等待进行中的背景去除任务结束。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// 退出原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// 用户中断信号 (Ctrl+C)
    Interrupt,
    /// 终止信号 (SIGTERM)
    Terminate,
    /// 应用请求退出
    Application,
}

/// 优雅退出错误类型
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("信号设置失败: {0}")]
    SignalSetup(String),

    #[error("等待进行中的任务超时（{0:?}）")]
    DrainTimeout(Duration),
}

#[derive(Debug)]
struct ShutdownInner {
    notify: Notify,
    reason: std::sync::Mutex<Option<ShutdownReason>>,
    shutting_down: AtomicBool,
}

/// 优雅退出管理器
#[derive(Debug, Clone)]
pub struct ShutdownManager {
    inner: Arc<ShutdownInner>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ShutdownInner {
                notify: Notify::new(),
                reason: std::sync::Mutex::new(None),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    fn last_reason(&self) -> ShutdownReason {
        let reason = *self
            .inner
            .reason
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        reason.unwrap_or(ShutdownReason::Application)
    }

    /// 等待退出信号；已触发过则立即返回。
    pub async fn wait_for_shutdown(&self) -> ShutdownReason {
        let notified = self.inner.notify.notified();
        if self.is_shutting_down() {
            return self.last_reason();
        }
        notified.await;
        self.last_reason()
    }

    /// 触发优雅退出，仅首次生效
    pub fn trigger_shutdown(&self, reason: ShutdownReason) {
        {
            // 原因与标志在同一把锁内写入，等待方读到标志时原因必然已就绪
            let mut guard = self
                .inner
                .reason
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let first = self
                .inner
                .shutting_down
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok();
            if !first {
                debug!("重复的退出信号被忽略");
                return;
            }
            *guard = Some(reason);
        }

        info!("触发优雅退出: {:?}", reason);
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// 启动信号处理器
    pub async fn start_signal_handler(&self) -> Result<(), ShutdownError> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let mut sigint = signal(SignalKind::interrupt())
                .map_err(|e| ShutdownError::SignalSetup(e.to_string()))?;
            let mut sigterm = signal(SignalKind::terminate())
                .map_err(|e| ShutdownError::SignalSetup(e.to_string()))?;

            let manager = self.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = sigint.recv() => {
                        info!("接收到SIGINT信号 (Ctrl+C)");
                        manager.trigger_shutdown(ShutdownReason::Interrupt);
                    }
                    _ = sigterm.recv() => {
                        info!("接收到SIGTERM信号");
                        manager.trigger_shutdown(ShutdownReason::Terminate);
                    }
                }
            });
        }

        #[cfg(windows)]
        {
            let manager = self.clone();
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("监听Ctrl+C信号失败: {}", e);
                    return;
                }
                info!("接收到Ctrl+C信号");
                manager.trigger_shutdown(ShutdownReason::Interrupt);
            });
        }

        Ok(())
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 在超时时间内等待所有进行中的背景去除任务结束
pub async fn drain_in_flight(state: &AppState, timeout: Duration) -> Result<(), ShutdownError> {
    let in_flight = (state.processing_permits as usize)
        .saturating_sub(state.processing_semaphore.available_permits());
    if in_flight > 0 {
        info!(in_flight, "等待进行中的背景去除任务完成");
    }

    if state.drain_processing(timeout).await {
        Ok(())
    } else {
        warn!("优雅退出超时，仍有任务未完成");
        Err(ShutdownError::DrainTimeout(timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_then_wait_returns_immediately() {
        let manager = ShutdownManager::new();
        assert!(!manager.is_shutting_down());

        manager.trigger_shutdown(ShutdownReason::Application);
        assert!(manager.is_shutting_down());
        assert_eq!(
            manager.wait_for_shutdown().await,
            ShutdownReason::Application
        );
    }

    #[tokio::test]
    async fn only_first_trigger_counts() {
        let manager = ShutdownManager::new();
        manager.trigger_shutdown(ShutdownReason::Interrupt);
        manager.trigger_shutdown(ShutdownReason::Terminate);
        assert_eq!(manager.wait_for_shutdown().await, ShutdownReason::Interrupt);
    }

    #[tokio::test]
    async fn waiters_are_woken_by_trigger() {
        let manager = ShutdownManager::new();
        let waiter = {
            let m = manager.clone();
            tokio::spawn(async move { m.wait_for_shutdown().await })
        };
        tokio::task::yield_now().await;
        manager.trigger_shutdown(ShutdownReason::Terminate);
        let reason = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woke up")
            .expect("join");
        assert_eq!(reason, ShutdownReason::Terminate);
    }

    #[tokio::test]
    async fn wait_times_out_without_trigger() {
        let manager = ShutdownManager::new();
        let res =
            tokio::time::timeout(Duration::from_millis(50), manager.wait_for_shutdown()).await;
        assert!(res.is_err());
    }
}
