//! In-memory radio medium.
//!
//! An `Ether` is a shared broadcast channel with an explicit link topology.
//! A frame sent by one station is heard by every station linked to it and
//! never by the sender itself, like a half-duplex LoRa transceiver. Used by
//! tests and simulations to build multi-hop meshes in one process.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::Notify;

use crate::radio::{Radio, RadioError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StationId(usize);

#[derive(Default)]
struct Station {
    inbox: VecDeque<Bytes>,
    rx: Arc<Notify>,
    /// Every frame this station put on the air, in order.
    sent: Vec<Bytes>,
    fail_sends: bool,
}

/// Shared broadcast medium.
#[derive(Clone, Default)]
pub struct Ether {
    stations: Arc<DashMap<StationId, Station>>,
    links: Arc<DashMap<StationId, HashSet<StationId>>>,
    next_id: Arc<AtomicUsize>,
}

impl Ether {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new station with no links.
    pub fn radio(&self) -> MemoryRadio {
        let id = StationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.stations.insert(id, Station::default());
        self.links.insert(id, HashSet::new());
        MemoryRadio {
            id,
            ether: self.clone(),
        }
    }

    /// Make two stations hear each other.
    pub fn link(&self, a: StationId, b: StationId) {
        if a == b {
            return;
        }
        self.links.entry(a).or_default().insert(b);
        self.links.entry(b).or_default().insert(a);
    }

    pub fn unlink(&self, a: StationId, b: StationId) {
        if let Some(mut set) = self.links.get_mut(&a) {
            set.remove(&b);
        }
        if let Some(mut set) = self.links.get_mut(&b) {
            set.remove(&a);
        }
    }

    /// Link stations in a line: ids[0] - ids[1] - ... - ids[n-1].
    pub fn chain(&self, ids: &[StationId]) {
        for pair in ids.windows(2) {
            self.link(pair[0], pair[1]);
        }
    }

    /// Make a station's transmits fail until cleared.
    pub fn set_send_failure(&self, id: StationId, fail: bool) {
        if let Some(mut station) = self.stations.get_mut(&id) {
            station.fail_sends = fail;
        }
    }

    /// Frames a station has transmitted so far.
    pub fn transmissions(&self, id: StationId) -> Vec<Bytes> {
        self.stations
            .get(&id)
            .map(|s| s.sent.clone())
            .unwrap_or_default()
    }

    /// Deliver a frame to one station as if it had been heard on the air.
    pub fn inject(&self, id: StationId, frame: &[u8]) {
        self.deliver(id, Bytes::copy_from_slice(frame));
    }

    fn deliver(&self, id: StationId, frame: Bytes) {
        let rx = match self.stations.get_mut(&id) {
            Some(mut station) => {
                station.inbox.push_back(frame);
                station.rx.clone()
            }
            None => return,
        };
        rx.notify_one();
    }

    fn transmit(&self, from: StationId, frame: &[u8]) -> Result<(), RadioError> {
        let frame = Bytes::copy_from_slice(frame);
        {
            let mut station = self
                .stations
                .get_mut(&from)
                .ok_or_else(|| RadioError::Driver("station detached".into()))?;
            if station.fail_sends {
                return Err(RadioError::Busy);
            }
            station.sent.push(frame.clone());
        }
        let neighbours: Vec<StationId> = self
            .links
            .get(&from)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        for n in neighbours {
            self.deliver(n, frame.clone());
        }
        Ok(())
    }
}

/// One station's transceiver on an `Ether`.
pub struct MemoryRadio {
    id: StationId,
    ether: Ether,
}

impl MemoryRadio {
    pub fn id(&self) -> StationId {
        self.id
    }
}

impl Radio for MemoryRadio {
    fn available(&mut self) -> bool {
        self.ether
            .stations
            .get(&self.id)
            .map(|s| !s.inbox.is_empty())
            .unwrap_or(false)
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), RadioError> {
        self.ether.transmit(self.id, frame)
    }

    fn recv(&mut self, buf: &mut [u8]) -> Option<usize> {
        let frame = self.ether.stations.get_mut(&self.id)?.inbox.pop_front()?;
        let n = frame.len().min(buf.len());
        buf[..n].copy_from_slice(&frame[..n]);
        Some(n)
    }

    fn rx_signal(&self) -> Arc<Notify> {
        self.ether
            .stations
            .get(&self.id)
            .map(|s| s.rx.clone())
            .unwrap_or_default()
    }
}
