//! 会话回收任务：按固定间隔清理闲置会话，关闭信号到达即退出

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::session::SessionRegistry;

pub fn spawn_sweeper(
    registry: Arc<SessionRegistry>,
    ttl: Duration,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every.max(Duration::from_millis(10)));
        interval.tick().await; // 跳过启动后立即执行
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("session sweeper stopped");
                    break;
                }
                _ = interval.tick() => {
                    let removed = registry.sweep(ttl).await;
                    if removed > 0 {
                        let remaining = registry.len().await;
                        tracing::info!(removed, remaining, "idle sessions evicted");
                    }
                }
            }
        }
    })
}
