use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};

use super::parse_session_id;
use crate::server::error::ApiError;
use crate::server::state::AppState;
use crate::session::{CreateRequest, SessionSummary};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillRequest {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct InterruptResponse {
    pub status: &'static str,
    /// Whether a viewer was attached to receive it
    pub delivered: bool,
}

/// GET /api/sessions
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<SessionSummary>> {
    Json(state.coordinator.list().await)
}

/// POST /api/sessions/create
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateRequest>,
) -> Result<Json<SessionSummary>, ApiError> {
    let session = state.coordinator.create(request).await?;
    Ok(Json(session.summary()))
}

/// POST /api/sessions/kill - succeeds for unknown ids
pub async fn kill_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<KillRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let id = parse_session_id(&request.session_id)?;
    state.coordinator.kill(&id).await?;
    Ok(Json(StatusResponse { status: "success" }))
}

/// POST /api/sessions/{id}/interrupt
pub async fn interrupt_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<InterruptResponse>, ApiError> {
    let id = parse_session_id(&id)?;
    state.coordinator.get(&id).await?;
    let delivered = state.coordinator.interrupt(&id).await?;
    Ok(Json(InterruptResponse {
        status: "success",
        delivered,
    }))
}
