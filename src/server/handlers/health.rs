use std::sync::Arc;

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::server::state::AppState;

/// GET /health
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    let sessions = state.coordinator.registry().len().await;
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "sessions": sessions,
    }))
}
