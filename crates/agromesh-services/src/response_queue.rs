//! Inbound success responses, shared between the relay (producer), the
//! controller poller (non-destructive reader) and the uplink forwarder
//! (destructive reader).
//!
//! Each push gets a monotonically increasing id, used by the status API to
//! identify entries. A poll is satisfied by any queued entry for its
//! (controller, node) pair, including a late reply from an earlier cycle
//! that the forwarder has not drained yet.
//!
//! The forwarder may pop an entry while the poller is still waiting for it;
//! the poller then times out. Both readers are legitimate.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use agromesh_core::wire::DATA_LEN;
use agromesh_core::NodeAddress;
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

/// One success response addressed to this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseEntry {
    pub id: u64,
    pub dest: NodeAddress,
    pub src: NodeAddress,
    pub data: [u8; DATA_LEN],
    /// Seconds since the Unix epoch when the relay queued it.
    pub received_at: u64,
}

struct QueueInner {
    entries: VecDeque<ResponseEntry>,
    last_id: u64,
}

#[derive(Clone)]
pub struct ResponseQueue {
    inner: Arc<Mutex<QueueInner>>,
    changed: Arc<Notify>,
    capacity: usize,
}

impl ResponseQueue {
    /// Queue holding at most `capacity` entries; the oldest is dropped when full.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner {
                entries: VecDeque::with_capacity(capacity),
                last_id: 0,
            })),
            changed: Arc::new(Notify::new()),
            capacity: capacity.max(1),
        }
    }

    /// Append a response and wake every waiter. Returns its id.
    pub async fn push(&self, dest: NodeAddress, src: NodeAddress, data: [u8; DATA_LEN]) -> u64 {
        let id = {
            let mut inner = self.inner.lock().await;
            if inner.entries.len() >= self.capacity {
                if let Some(dropped) = inner.entries.pop_front() {
                    tracing::warn!(
                        src = %dropped.src,
                        id = dropped.id,
                        "response queue full, dropping oldest undrained reply"
                    );
                }
            }
            inner.last_id += 1;
            let id = inner.last_id;
            inner.entries.push_back(ResponseEntry {
                id,
                dest,
                src,
                data,
                received_at: unix_now(),
            });
            id
        };
        self.changed.notify_waiters();
        id
    }

    /// Oldest queued entry with the given `dest` and `src`. Does not remove it.
    pub async fn find(&self, dest: &NodeAddress, src: &NodeAddress) -> Option<ResponseEntry> {
        self.inner
            .lock()
            .await
            .entries
            .iter()
            .find(|e| e.dest == *dest && e.src == *src)
            .cloned()
    }

    /// Wait until a matching entry is queued, or `deadline` passes.
    ///
    /// Wakes on every push rather than polling. Not cancellable from outside;
    /// it always resolves by match or by deadline.
    pub async fn wait_for(
        &self,
        dest: &NodeAddress,
        src: &NodeAddress,
        deadline: Instant,
    ) -> Option<ResponseEntry> {
        let wait = async {
            loop {
                // Register before scanning so a push in between is not missed.
                let notified = self.changed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if let Some(entry) = self.find(dest, src).await {
                    return entry;
                }
                notified.await;
            }
        };
        tokio::time::timeout_at(deadline, wait).await.ok()
    }

    /// Copy of every queued entry, oldest first.
    pub async fn snapshot(&self) -> Vec<ResponseEntry> {
        self.inner.lock().await.entries.iter().cloned().collect()
    }

    pub async fn pop_front(&self) -> Option<ResponseEntry> {
        self.inner.lock().await.entries.pop_front()
    }

    /// Remove and return everything queued.
    pub async fn drain(&self) -> Vec<ResponseEntry> {
        self.inner.lock().await.entries.drain(..).collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
