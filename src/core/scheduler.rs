//! 节拍调度：按配置的节拍周期驱动 Copilot::tick
//!
//! 一个后台任务，tokio interval + CancellationToken；错过的节拍直接跳过，不补发。

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::core::Copilot;

pub struct TickScheduler {
    period: Duration,
    cancel: CancellationToken,
}

impl TickScheduler {
    pub fn new(period: Duration, cancel: CancellationToken) -> Self {
        Self {
            period: period.max(Duration::from_millis(1)),
            cancel,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// 启动后台节拍任务；token 触发后在下一个节拍边界前退出
    pub fn spawn(self, copilot: Arc<Copilot>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(period_ms = self.period.as_millis() as u64, "tick scheduler started");

            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let events = copilot.tick().await;
                        if !events.is_empty() {
                            tracing::debug!(events = events.len(), "tick produced lifecycle events");
                        }
                    }
                }
            }
            tracing::info!("tick scheduler stopped");
        })
    }
}
