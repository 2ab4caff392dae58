use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::scheduler::registry::StatusRegistry;

/// Spawn a background task that evicts terminal jobs older than `ttl`.
///
/// The engine itself never deletes status records; deployments that need
/// bounded memory opt into this reaper. It stops when `token` is cancelled.
pub fn spawn_reaper(
    registry: Arc<StatusRegistry>,
    ttl: Duration,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = registry.evict_terminal(ttl).await;
                    if evicted > 0 {
                        tracing::debug!(evicted, ttl_secs = ttl.as_secs(), "Evicted finished jobs");
                    }
                }
            }
        }

        tracing::debug!("Retention reaper stopped");
    })
}
