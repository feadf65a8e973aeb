use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{directories, health, sessions, ws};
use super::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/sessions", get(sessions::list_sessions))
        .route("/api/sessions/create", post(sessions::create_session))
        .route("/api/sessions/kill", post(sessions::kill_session))
        .route("/api/sessions/{id}/interrupt", post(sessions::interrupt_session))
        // Repository picker
        .route("/api/directories", get(directories::list_directories))
        .route("/api/directories/root", get(directories::list_root))
        .route("/api/git-repos", get(directories::find_repositories))
        // Streams
        .route("/ws/events", get(ws::events))
        .route("/ws/{id}", get(ws::terminal))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
