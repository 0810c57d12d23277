use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Compact the journal once `threshold` appends have piled up since the last
/// compaction. Returns the number of events written, if it ran.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> Option<usize> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        debug!("compactor: {appends} appends since last compaction, below {threshold}");
        return None;
    }
    match engine.compact_wal().await {
        Ok(written) => {
            info!("compacted journal: {appends} appends folded into {written} events");
            Some(written)
        }
        Err(e) => {
            warn!("journal compaction failed: {e}");
            None
        }
    }
}

/// Background task checking the journal size every 30 seconds.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&engine, threshold).await;
    }
}
