//! Dead-letter monitor: the operational alert signal.
//!
//! A non-empty dead-letter store means messages were dropped from the
//! pipeline and someone needs to look. The monitor polls the pending count,
//! publishes it as a gauge, and logs a warn-level alert line whenever the
//! count is non-zero. This is the only externally observable failure signal
//! besides the logs themselves.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, warn};
use waypost_core::dead_letter::DeadLetterStore;

/// Spawn the periodic dead-letter monitor.
#[must_use]
pub fn spawn_dlq_monitor(
    dead_letters: Arc<dyn DeadLetterStore>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    match dead_letters.count_pending().await {
                        Ok(pending) => {
                            #[allow(clippy::cast_precision_loss)] // Gauge precision is fine here
                            metrics::gauge!("pipeline.dead_letters.pending").set(pending as f64);
                            if pending > 0 {
                                warn!(
                                    pending = pending,
                                    "ALERT: dead letter queue is not empty"
                                );
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to poll dead letter count");
                        }
                    }
                }
            }
        }
    })
}
