//! Per-node health as seen by a controller.

use std::sync::Arc;

use agromesh_core::NodeAddress;
use dashmap::DashMap;
use serde::Serialize;

use crate::notify::{Notifier, NotifyReason};
use crate::response_queue::ResponseEntry;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub address: String,
    pub polls_sent: u64,
    /// Unix seconds of the last success response.
    pub last_reply_at: Option<u64>,
    /// Hex of the last reading.
    pub last_data: Option<String>,
    /// Code from the last `ErrorResponse`, cleared by the next success.
    pub last_error: Option<u8>,
    pub consecutive_timeouts: u32,
    pub send_failures: u64,
}

impl NodeStatus {
    fn new(address: &NodeAddress) -> Self {
        Self {
            address: address.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Clone, Default)]
pub struct NodeStatusTable {
    nodes: Arc<DashMap<NodeAddress, NodeStatus>>,
}

impl NodeStatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track exactly these nodes. Entries for nodes no longer listed are dropped.
    pub fn track(&self, nodes: &[NodeAddress]) {
        self.nodes.retain(|addr, _| nodes.contains(addr));
        for n in nodes {
            self.nodes.entry(*n).or_insert_with(|| NodeStatus::new(n));
        }
    }

    pub fn record_poll(&self, node: &NodeAddress) {
        self.nodes
            .entry(*node)
            .or_insert_with(|| NodeStatus::new(node))
            .polls_sent += 1;
    }

    pub fn record_reply(&self, entry: &ResponseEntry) {
        let mut status = self
            .nodes
            .entry(entry.src)
            .or_insert_with(|| NodeStatus::new(&entry.src));
        status.last_reply_at = Some(entry.received_at);
        status.last_data = Some(hex::encode(entry.data));
        status.last_error = None;
        status.consecutive_timeouts = 0;
    }

    pub fn get(&self, node: &NodeAddress) -> Option<NodeStatus> {
        self.nodes.get(node).map(|s| s.clone())
    }

    /// Every tracked node, sorted by address.
    pub fn snapshot(&self) -> Vec<NodeStatus> {
        let mut all: Vec<NodeStatus> = self.nodes.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.address.cmp(&b.address));
        all
    }
}

impl Notifier for NodeStatusTable {
    fn notify(&self, node: &NodeAddress, reason: NotifyReason) {
        let mut status = self
            .nodes
            .entry(*node)
            .or_insert_with(|| NodeStatus::new(node));
        match reason {
            NotifyReason::NoResponse => status.consecutive_timeouts += 1,
            NotifyReason::ErrorResponse(code) => status.last_error = Some(code),
            NotifyReason::SendFailed => status.send_failures += 1,
        }
    }
}
