//! HTTP API handlers. Read-only views of node state as JSON.

pub mod nodes;
pub mod queue;
pub mod status;

use std::time::Instant;

use axum::http::StatusCode;
use tokio::sync::watch;

use agromesh_core::config::Role;
use agromesh_core::NodeAddress;
use agromesh_services::{NodeStatusTable, RelayStats, ResponseQueue, SequenceCounter};

#[derive(Clone)]
pub struct ApiState {
    pub address: NodeAddress,
    pub role: Role,
    pub sequence: SequenceCounter,
    pub relay_stats: RelayStats,
    pub queue: ResponseQueue,
    pub nodes: NodeStatusTable,
    pub known_nodes: watch::Receiver<Vec<NodeAddress>>,
    pub started_at: Instant,
}

// ── Shared helpers ────────────────────────────────────────────────────────────

fn parse_address(s: &str) -> Result<NodeAddress, (StatusCode, String)> {
    s.parse()
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("invalid node address: {s:?}")))
}
