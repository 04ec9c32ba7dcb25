use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::model::now_ms;

/// Periodically drops pending checkouts whose hold ran out.
pub async fn run_reaper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        reap_once(&engine).await;
    }
}

async fn reap_once(engine: &Engine) -> usize {
    let now = now_ms();
    let mut reaped = 0;
    for (id, room_id) in engine.collect_expired_pending(now) {
        match engine.expire_checkout(id, now).await {
            Ok(true) => {
                reaped += 1;
                info!("reaped expired checkout {id} on room {room_id}");
            }
            Ok(false) => debug!("reaper skip {id}: confirmed or renewed"),
            // Released or confirmed by its guest in the meantime
            Err(e) => debug!("reaper skip {id}: {e}"),
        }
    }
    reaped
}

/// Compacts the WAL once it has grown by `threshold` appends.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}
