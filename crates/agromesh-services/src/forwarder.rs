//! Periodic hand-off of queued readings to the upstream collector.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::response_queue::{ResponseEntry, ResponseQueue};

/// Upstream sink for drained readings.
pub trait Uplink: Send + Sync {
    fn deliver(&self, batch: &[ResponseEntry]) -> anyhow::Result<()>;
}

pub struct UplinkForwarder {
    queue: ResponseQueue,
    uplink: Arc<dyn Uplink>,
}

impl UplinkForwarder {
    pub fn new(queue: ResponseQueue, uplink: Arc<dyn Uplink>) -> Self {
        Self { queue, uplink }
    }

    /// Drain the queue and deliver the batch. Returns how many entries went out.
    ///
    /// A failed delivery is logged and the batch is dropped; the readings are
    /// already stale by the next interval.
    pub async fn flush(&self) -> usize {
        let batch = self.queue.drain().await;
        if batch.is_empty() {
            return 0;
        }
        match self.uplink.deliver(&batch) {
            Ok(()) => {
                tracing::info!(count = batch.len(), "uplinked readings");
                batch.len()
            }
            Err(e) => {
                tracing::warn!(count = batch.len(), error = %e, "uplink delivery failed, batch dropped");
                0
            }
        }
    }

    pub async fn run(self, interval: Duration, mut shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately; nothing is queued yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    self.flush().await;
                    tracing::info!("uplink forwarder shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.flush().await;
                }
            }
        }
    }
}
