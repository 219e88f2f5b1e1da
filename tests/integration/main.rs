//! agromesh integration test harness.
//!
//! Tests here run whole nodes (relay task, role dispatcher, poller) on an
//! in-memory radio medium with an explicit link topology, so multi-hop
//! floods can be exercised in one process. Every test runs with tokio's
//! clock paused: radio traffic is event driven and completes before the
//! clock is allowed to advance, so response timeouts are deterministic.

mod flood;
mod polling;
mod scenarios;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;

use agromesh_core::wire::DATA_LEN;
use agromesh_core::{NodeAddress, Packet};
use agromesh_services::{
    ControllerPoller, DedupCache, Ether, NodeStatusTable, Notifier, NotifierSet, NotifyReason,
    NullDedupStore, OriginHandle, RelayEngine, RelayStats, ResponseQueue, RoleDispatcher,
    SensorDriver, SensorError, SequenceCounter, SharedRadio, StationId,
};
use agromesh_services::dedup::capacity_for;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const TTL: u8 = 3;
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(120);

pub fn addr(s: &str) -> NodeAddress {
    s.parse().unwrap()
}

/// Sensor that always returns the same result.
pub struct FixedSensor(pub Result<[u8; DATA_LEN], SensorError>);

impl SensorDriver for FixedSensor {
    fn read(&mut self) -> Result<[u8; DATA_LEN], SensorError> {
        self.0
    }
}

/// Notifier that remembers every notification.
#[derive(Default)]
pub struct Recorder(Mutex<Vec<(NodeAddress, NotifyReason)>>);

impl Recorder {
    pub fn events(&self) -> Vec<(NodeAddress, NotifyReason)> {
        self.0.lock().unwrap().clone()
    }
}

impl Notifier for Recorder {
    fn notify(&self, node: &NodeAddress, reason: NotifyReason) {
        self.0.lock().unwrap().push((*node, reason));
    }
}

/// Handles onto one running node.
pub struct MeshNode {
    pub address: NodeAddress,
    pub station: StationId,
    pub radio: SharedRadio,
    pub sequence: SequenceCounter,
    pub queue: ResponseQueue,
    pub stats: RelayStats,
    pub status: NodeStatusTable,
    pub recorder: Arc<Recorder>,
    origin: OriginHandle,
    known: watch::Receiver<Vec<NodeAddress>>,
}

impl MeshNode {
    /// A poller driving this node's radio, as a controller's daemon would.
    pub fn poller(&self) -> ControllerPoller {
        let notifier = NotifierSet::new()
            .with(self.recorder.clone())
            .with(Arc::new(self.status.clone()));
        ControllerPoller::new(
            self.address,
            self.radio.clone(),
            self.sequence.clone(),
            self.queue.clone(),
            Arc::new(notifier),
            self.known.clone(),
            TTL,
            RESPONSE_TIMEOUT,
        )
        .with_origin(self.origin.clone())
        .with_status(self.status.clone())
    }
}

/// A set of nodes sharing one `Ether`.
pub struct Mesh {
    pub ether: Ether,
    nodes: Vec<MeshNode>,
    pending: Vec<RelayEngine>,
    known_tx: watch::Sender<Vec<NodeAddress>>,
    shutdown: broadcast::Sender<()>,
    tasks: JoinSet<anyhow::Result<()>>,
}

impl Mesh {
    /// Empty mesh. `known` is the node list every node is configured with.
    pub fn new(known: &[&str]) -> Self {
        let (known_tx, _) = watch::channel(known.iter().map(|s| addr(s)).collect());
        let (shutdown, _) = broadcast::channel(1);
        Self {
            ether: Ether::new(),
            nodes: Vec::new(),
            pending: Vec::new(),
            known_tx,
            shutdown,
            tasks: JoinSet::new(),
        }
    }

    pub fn controller(&mut self, address: &str) -> StationId {
        self.add(address, None)
    }

    pub fn sensor(&mut self, address: &str, reading: Result<[u8; DATA_LEN], SensorError>) -> StationId {
        self.add(address, Some(Box::new(FixedSensor(reading))))
    }

    fn add(&mut self, address: &str, sensor: Option<Box<dyn SensorDriver>>) -> StationId {
        let address = addr(address);
        let radio = self.ether.radio();
        let station = radio.id();
        let radio = SharedRadio::new(Box::new(radio));
        let sequence = SequenceCounter::new();
        let queue = ResponseQueue::new(16);
        let status = NodeStatusTable::new();
        let recorder = Arc::new(Recorder::default());
        let known = self.known_tx.subscribe();

        let dispatcher = match sensor {
            Some(sensor) => RoleDispatcher::sensor(sensor, sequence.clone(), radio.clone()),
            None => {
                let notifier = NotifierSet::new()
                    .with(recorder.clone())
                    .with(Arc::new(status.clone()));
                RoleDispatcher::controller(queue.clone(), Arc::new(notifier))
            }
        };
        let cache = DedupCache::new(capacity_for(known.borrow().len()), Box::new(NullDedupStore));
        let mut relay = RelayEngine::new(address, cache, radio.clone(), dispatcher);
        let origin = relay.origin_handle();

        self.nodes.push(MeshNode {
            address,
            station,
            radio,
            sequence,
            queue,
            stats: relay.stats(),
            status,
            recorder,
            origin,
            known,
        });
        self.pending.push(relay);
        station
    }

    pub fn link(&self, a: StationId, b: StationId) {
        self.ether.link(a, b);
    }

    pub fn chain(&self, ids: &[StationId]) {
        self.ether.chain(ids);
    }

    /// Spawn the relay task of every node added so far.
    pub fn start(&mut self) {
        for relay in self.pending.drain(..) {
            let known = self.known_tx.subscribe();
            let shutdown = self.shutdown.subscribe();
            self.tasks.spawn(relay.run(Some(known), shutdown));
        }
    }

    pub fn node(&self, address: &str) -> &MeshNode {
        let address = addr(address);
        self.nodes
            .iter()
            .find(|n| n.address == address)
            .unwrap_or_else(|| panic!("no node {address}"))
    }

    /// Replace the known-node list on every node.
    pub fn set_known(&self, known: &[&str]) {
        self.known_tx.send_replace(known.iter().map(|s| addr(s)).collect());
    }

    /// Decoded frames a station has put on the air.
    pub fn sent(&self, station: StationId) -> Vec<Packet> {
        self.ether
            .transmissions(station)
            .iter()
            .map(|f| Packet::decode(f).unwrap())
            .collect()
    }

    /// Let every in-flight frame be processed.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    pub async fn stop(mut self) {
        let _ = self.shutdown.send(());
        while let Some(joined) = self.tasks.join_next().await {
            joined.unwrap().unwrap();
        }
    }
}
