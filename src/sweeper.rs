use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::correlation::SweepableStore;
use crate::observability::RelayMetrics;

struct SweepTarget {
    name: String,
    store: Arc<dyn SweepableStore>,
    metrics: Arc<RelayMetrics>,
}

/// Periodically drops expired entries from every registered store so
/// abandoned sessions don't grow memory without bound. Reads enforce the TTL
/// on their own; this only reclaims memory.
pub struct ExpirySweeper {
    interval: Duration,
    targets: Vec<SweepTarget>,
}

impl ExpirySweeper {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            targets: Vec::new(),
        }
    }

    pub fn register(
        &mut self,
        name: &str,
        store: Arc<dyn SweepableStore>,
        metrics: Arc<RelayMetrics>,
    ) {
        self.targets.push(SweepTarget {
            name: name.to_string(),
            store,
            metrics,
        });
    }

    /// Sweep every store once, returning the total number of entries dropped.
    pub fn sweep_once(&self) -> usize {
        self.targets
            .iter()
            .map(|target| {
                let removed = target.store.sweep_expired();
                target.metrics.record_swept(removed);
                if removed > 0 {
                    info!(
                        integration = %target.name,
                        removed,
                        remaining = target.store.stats().sessions,
                        "Swept expired entries"
                    );
                }
                removed
            })
            .sum()
    }

    /// Run until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; nothing can have expired yet.
        ticker.tick().await;

        info!(interval_secs = self.interval.as_secs(), "Expiry sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.sweep_once();
                    debug!(removed, "Sweep tick");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        for target in &self.targets {
            target.metrics.log_stats(&target.name);
        }
        info!("Expiry sweeper stopped");
    }
}
