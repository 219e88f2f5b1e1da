//! /nodes handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use agromesh_services::NodeStatus;

use super::{parse_address, ApiState};

#[derive(Serialize)]
pub struct NodesResponse {
    pub nodes: Vec<NodeStatus>,
}

pub async fn handle_nodes(State(state): State<ApiState>) -> Json<NodesResponse> {
    Json(NodesResponse {
        nodes: state.nodes.snapshot(),
    })
}

pub async fn handle_node(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> Result<Json<NodeStatus>, (StatusCode, String)> {
    let address = parse_address(&address)?;
    state
        .nodes
        .get(&address)
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("node {address} not tracked")))
}
