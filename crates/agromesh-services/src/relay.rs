//! Receive-side relay pipeline.
//!
//! Every inbound frame runs the same guard chain, independently of any
//! other frame:
//!
//!   1. length: shorter than the smallest packet: radio noise, drop
//!   2. integrity: CRC trailer mismatch: drop
//!   3. decode: unknown kind, wrong length for kind, bad address: drop
//!   4. liveness: ttl == 0: the flood's hop budget is spent, drop
//!   5. dedup: fingerprint already seen: drop; otherwise remember it
//!   6. ownership: addressed to us: role dispatch; otherwise re-flood
//!
//! Drops in 1-5 are routine in a flood network and never surface as errors.
//! Re-flooding decrements ttl by exactly one, rewrites the CRC trailer over
//! the new ttl, and transmits; every other byte is forwarded unchanged. A
//! failed retransmit is returned to the caller and not retried.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use agromesh_core::integrity;
use agromesh_core::wire::{MAX_PACKET_LEN, MIN_PACKET_LEN};
use agromesh_core::{Fingerprint, NodeAddress, Packet, PacketKind};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};

use crate::dedup::{capacity_for, DedupCache};
use crate::radio::{RadioError, SharedRadio};
use crate::role::{Dispatched, ReplyError, RoleDispatcher};

// ── Outcomes ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Short,
    Corrupt,
    Malformed,
    Expired,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Silently discarded by a guard.
    Dropped(DropReason),
    /// Addressed to this node and handled by the role dispatcher.
    Delivered(Dispatched),
    /// Re-flooded with this ttl.
    Forwarded { kind: PacketKind, ttl: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("retransmit of {kind:?} failed: {source}")]
    Forward {
        kind: PacketKind,
        #[source]
        source: RadioError,
    },
    #[error(transparent)]
    Reply(#[from] ReplyError),
}

// ── Stats ─────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    short: AtomicU64,
    corrupt: AtomicU64,
    malformed: AtomicU64,
    expired: AtomicU64,
    duplicate: AtomicU64,
    delivered: AtomicU64,
    forwarded: AtomicU64,
    send_failures: AtomicU64,
}

/// Counters per guard outcome, shared with the status API.
#[derive(Clone, Default)]
pub struct RelayStats {
    counters: Arc<Counters>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelayStatsSnapshot {
    pub received: u64,
    pub short: u64,
    pub corrupt: u64,
    pub malformed: u64,
    pub expired: u64,
    pub duplicate: u64,
    pub delivered: u64,
    pub forwarded: u64,
    pub send_failures: u64,
}

impl RelayStats {
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        let c = &self.counters;
        RelayStatsSnapshot {
            received: c.received.load(Ordering::Relaxed),
            short: c.short.load(Ordering::Relaxed),
            corrupt: c.corrupt.load(Ordering::Relaxed),
            malformed: c.malformed.load(Ordering::Relaxed),
            expired: c.expired.load(Ordering::Relaxed),
            duplicate: c.duplicate.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            forwarded: c.forwarded.load(Ordering::Relaxed),
            send_failures: c.send_failures.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_drop(&self, reason: DropReason) {
        let c = &self.counters;
        Self::bump(match reason {
            DropReason::Short => &c.short,
            DropReason::Corrupt => &c.corrupt,
            DropReason::Malformed => &c.malformed,
            DropReason::Expired => &c.expired,
            DropReason::Duplicate => &c.duplicate,
        });
    }

    /// Log totals. Called periodically by the daemon.
    pub fn log(&self) {
        let s = self.snapshot();
        tracing::info!(
            received = s.received,
            delivered = s.delivered,
            forwarded = s.forwarded,
            duplicate = s.duplicate,
            expired = s.expired,
            corrupt = s.corrupt,
            short = s.short,
            malformed = s.malformed,
            send_failures = s.send_failures,
            "relay stats"
        );
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

pub struct RelayEngine {
    address: NodeAddress,
    cache: DedupCache,
    radio: SharedRadio,
    dispatcher: RoleDispatcher,
    stats: RelayStats,
    /// Fingerprints of packets other tasks on this node originated.
    originated: Option<mpsc::UnboundedReceiver<Fingerprint>>,
}

impl RelayEngine {
    pub fn new(
        address: NodeAddress,
        cache: DedupCache,
        radio: SharedRadio,
        dispatcher: RoleDispatcher,
    ) -> Self {
        Self {
            address,
            cache,
            radio,
            dispatcher,
            stats: RelayStats::default(),
            originated: None,
        }
    }

    /// Sender through which other tasks register packets they originate, so
    /// their echoes are treated as already seen.
    pub fn origin_handle(&mut self) -> OriginHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        self.originated = Some(rx);
        OriginHandle { tx }
    }

    pub fn stats(&self) -> RelayStats {
        self.stats.clone()
    }

    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    pub fn cache(&self) -> &DedupCache {
        &self.cache
    }

    /// Resize the dedup cache after the known-node list changed.
    pub fn set_known_nodes(&mut self, count: usize) {
        self.cache.resize(capacity_for(count));
    }

    /// Run one received frame through the guard chain.
    pub async fn process(&mut self, frame: &[u8]) -> Result<RelayOutcome, RelayError> {
        self.absorb_originated();
        RelayStats::bump(&self.stats.counters.received);

        let packet = match self.admit(frame) {
            Ok(p) => p,
            Err(reason) => {
                self.stats.record_drop(reason);
                return Ok(RelayOutcome::Dropped(reason));
            }
        };

        if *packet.dest() == self.address {
            return self.deliver(packet).await;
        }
        self.forward(packet).await
    }

    /// Guards 1-5. Returns the decoded packet if it should be acted on.
    fn admit(&mut self, frame: &[u8]) -> Result<Packet, DropReason> {
        if frame.len() < MIN_PACKET_LEN {
            tracing::trace!(len = frame.len(), "short frame");
            return Err(DropReason::Short);
        }
        if !integrity::validate(frame) {
            tracing::trace!(len = frame.len(), "crc mismatch");
            return Err(DropReason::Corrupt);
        }
        let packet = Packet::decode(frame).map_err(|e| {
            tracing::trace!(error = %e, "undecodable frame");
            DropReason::Malformed
        })?;
        if packet.ttl() == 0 {
            tracing::trace!(src = %packet.src(), "ttl exhausted");
            return Err(DropReason::Expired);
        }
        let fp = *packet.fingerprint();
        if self.cache.contains(&fp) {
            tracing::debug!(src = %packet.src(), fingerprint = %fp.short(), "duplicate suppressed");
            return Err(DropReason::Duplicate);
        }
        self.cache.insert(fp);
        Ok(packet)
    }

    async fn deliver(&mut self, packet: Packet) -> Result<RelayOutcome, RelayError> {
        RelayStats::bump(&self.stats.counters.delivered);
        tracing::debug!(src = %packet.src(), kind = ?packet.kind(), "packet for us");
        match self.dispatcher.dispatch(&self.address, packet).await {
            Ok(dispatched) => {
                if let Dispatched::Replied { fingerprint, .. } = &dispatched {
                    self.cache.insert(*fingerprint);
                }
                Ok(RelayOutcome::Delivered(dispatched))
            }
            Err(e) => {
                RelayStats::bump(&self.stats.counters.send_failures);
                tracing::warn!(error = %e, "reply not sent");
                Err(e.into())
            }
        }
    }

    async fn forward(&mut self, mut packet: Packet) -> Result<RelayOutcome, RelayError> {
        let kind = packet.kind();
        let ttl = packet.ttl() - 1;
        packet.set_ttl(ttl);

        let mut buf = [0u8; MAX_PACKET_LEN];
        let n = packet
            .encode_into(&mut buf)
            .map_err(|e| RelayError::Forward {
                kind,
                source: RadioError::Driver(e.to_string()),
            })?;

        match self.radio.send(&buf[..n]).await {
            Ok(()) => {
                RelayStats::bump(&self.stats.counters.forwarded);
                tracing::debug!(
                    src = %packet.src(),
                    dest = %packet.dest(),
                    ?kind,
                    ttl,
                    fingerprint = %packet.fingerprint().short(),
                    "re-flooded"
                );
                Ok(RelayOutcome::Forwarded { kind, ttl })
            }
            Err(source) => {
                RelayStats::bump(&self.stats.counters.send_failures);
                tracing::warn!(error = %source, ?kind, "retransmit failed");
                Err(RelayError::Forward { kind, source })
            }
        }
    }

    fn absorb_originated(&mut self) {
        if let Some(rx) = self.originated.as_mut() {
            while let Ok(fp) = rx.try_recv() {
                self.cache.insert(fp);
            }
        }
    }

    /// Receive loop. Runs until shutdown.
    ///
    /// `known_nodes`, if given, resizes the dedup cache whenever the
    /// known-node list is replaced.
    pub async fn run(
        mut self,
        mut known_nodes: Option<watch::Receiver<Vec<NodeAddress>>>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let mut buf = [0u8; MAX_PACKET_LEN + 1];
        let radio = self.radio.clone();
        tracing::info!(address = %self.address, capacity = self.cache.capacity(), "relay starting");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("relay shutting down");
                    return Ok(());
                }

                changed = async {
                    match known_nodes.as_mut() {
                        Some(rx) => rx.changed().await,
                        None => std::future::pending().await,
                    }
                } => {
                    if changed.is_err() {
                        known_nodes = None;
                        continue;
                    }
                    if let Some(rx) = known_nodes.as_mut() {
                        let count = rx.borrow_and_update().len();
                        self.set_known_nodes(count);
                    }
                }

                n = radio.recv(&mut buf) => {
                    match self.process(&buf[..n]).await {
                        Ok(RelayOutcome::Dropped(_)) => {}
                        Ok(outcome) => tracing::trace!(?outcome, "frame handled"),
                        Err(e) => tracing::debug!(error = %e, "frame consumed with send failure"),
                    }
                }
            }
        }
    }
}

/// Registers fingerprints of locally originated packets with the relay.
#[derive(Clone)]
pub struct OriginHandle {
    tx: mpsc::UnboundedSender<Fingerprint>,
}

impl OriginHandle {
    pub fn originated(&self, fingerprint: Fingerprint) {
        // The relay may already have shut down; nothing to remember then.
        let _ = self.tx.send(fingerprint);
    }
}
