//! Liveness probing of cached sessions.

use std::sync::{Arc, Weak};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{CacheInner, Record};
use crate::config::CacheConfig;

/// Probes the record's device every interval until cancelled.
///
/// Each failure spends one unit of the budget and a success restores it.
/// A failure with nothing left evicts the record that armed this loop.
pub(crate) async fn heartbeat(
    cache: Weak<CacheInner>,
    record: Arc<Record>,
    config: CacheConfig,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(config.heartbeat_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await; // Skip immediate first tick.

    let mut remaining = config.heartbeat_failure_budget;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let result = record
            .session
            .session()
            .device()
            .base_info_query(config.heartbeat_channel)
            .await;
        if cancel.is_cancelled() {
            break;
        }

        match result {
            Ok(_) => {
                debug!(key = %record.key, "heartbeat ok");
                remaining = config.heartbeat_failure_budget;
            }
            Err(e) if remaining > 0 => {
                remaining -= 1;
                warn!(key = %record.key, error = %e, remaining, "heartbeat failed");
            }
            Err(e) => {
                warn!(key = %record.key, error = %e, "heartbeat budget exhausted, evicting");
                // Eviction joins this task, so it must run elsewhere.
                if let Some(inner) = cache.upgrade() {
                    let (key, id) = (record.key.clone(), record.id);
                    tokio::spawn(async move { inner.evict_if_current(&key, id).await });
                }
                break;
            }
        }
    }
    debug!(key = %record.key, "heartbeat stopped");
}
