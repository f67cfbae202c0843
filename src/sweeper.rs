use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Engine;
use crate::model::now_ms;

/// Background task that periodically reclaims expired holds. The engine's
/// sweep uses try-lock-and-skip, so this never stalls interactive traffic;
/// anything skipped is picked up on a later tick.
pub async fn run_sweeper(engine: Arc<Engine>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        match engine.expire_due_holds(now_ms()).await {
            Ok(0) => {}
            Ok(released) => {
                metrics::counter!(crate::observability::HOLDS_EXPIRED_TOTAL)
                    .increment(released as u64);
                info!(released, "sweep reclaimed expired holds");
            }
            Err(e) => warn!("sweep pass failed: {e}"), // next tick retries
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate
/// since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        if engine.wal_appends_since_compact().await >= threshold {
            match engine.compact_wal().await {
                Ok(()) => info!("wal compacted"),
                Err(e) => warn!("wal compaction failed: {e}"),
            }
        }
    }
}
