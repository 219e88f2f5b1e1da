//! /queue handler. Non-destructive view of undrained replies.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::ApiState;

#[derive(Serialize)]
pub struct QueueResponse {
    pub depth: usize,
    pub entries: Vec<QueueEntryJson>,
}

#[derive(Serialize)]
pub struct QueueEntryJson {
    pub id: u64,
    pub src: String,
    pub dest: String,
    pub data: String,
    pub received_at: u64,
}

pub async fn handle_queue(State(state): State<ApiState>) -> Json<QueueResponse> {
    let entries: Vec<QueueEntryJson> = state
        .queue
        .snapshot()
        .await
        .into_iter()
        .map(|e| QueueEntryJson {
            id: e.id,
            src: e.src.to_string(),
            dest: e.dest.to_string(),
            data: hex::encode(e.data),
            received_at: e.received_at,
        })
        .collect();

    Json(QueueResponse {
        depth: entries.len(),
        entries,
    })
}
