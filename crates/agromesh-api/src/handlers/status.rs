//! /status handler.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use agromesh_services::RelayStatsSnapshot;

use super::ApiState;

#[derive(Serialize)]
pub struct StatusResponse {
    pub address: String,
    pub role: String,
    pub sequence: u8,
    pub uptime_secs: u64,
    pub known_nodes: Vec<String>,
    pub queue_depth: usize,
    pub relay: RelayStatsSnapshot,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let known_nodes = state
        .known_nodes
        .borrow()
        .iter()
        .map(|a| a.to_string())
        .collect();

    Json(StatusResponse {
        address: state.address.to_string(),
        role: format!("{:?}", state.role).to_lowercase(),
        sequence: state.sequence.current().await,
        uptime_secs: state.started_at.elapsed().as_secs(),
        known_nodes,
        queue_depth: state.queue.len().await,
        relay: state.relay_stats.snapshot(),
    })
}
