use std::sync::Arc;
use std::time::Duration;

use chrono::Days;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::Config;
use crate::engine::Engine;

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const RETENTION_INTERVAL: Duration = Duration::from_secs(3600);

/// Rewrite the WAL whenever it has grown by `threshold` appends.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}

/// Periodically drop reservations that checked out more than `retain_days` ago.
pub async fn run_retention(engine: Arc<Engine>, retain_days: u32) {
    let mut interval = tokio::time::interval(RETENTION_INTERVAL);
    loop {
        interval.tick().await;
        let Some(cutoff) = engine.today().checked_sub_days(Days::new(u64::from(retain_days))) else {
            continue;
        };
        if let Err(e) = engine.purge_elapsed(cutoff).await {
            tracing::warn!("retention sweep failed: {e}");
        }
    }
}

/// Start the background tasks `config` asks for.
pub fn spawn_maintenance(engine: Arc<Engine>, config: &Config) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    if config.compact_threshold > 0 {
        handles.push(tokio::spawn(run_compactor(engine.clone(), config.compact_threshold)));
    }
    if let Some(days) = config.retention_days {
        handles.push(tokio::spawn(run_retention(engine, days)));
    }
    handles
}
