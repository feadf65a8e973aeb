use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;

use crate::browser::{DirectoryListing, RepositoryListing};
use crate::server::error::ApiError;
use crate::server::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct PathQuery {
    pub path: Option<PathBuf>,
}

/// GET /api/directories?path= - home directory when no path is given
pub async fn list_directories(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PathQuery>,
) -> Result<Json<DirectoryListing>, ApiError> {
    let listing = state.browser.list(query.path.as_deref()).await?;
    Ok(Json(listing))
}

/// GET /api/directories/root
pub async fn list_root(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DirectoryListing>, ApiError> {
    let listing = state.browser.list(Some(Path::new("/"))).await?;
    Ok(Json(listing))
}

/// GET /api/git-repos?path=
pub async fn find_repositories(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PathQuery>,
) -> Result<Json<RepositoryListing>, ApiError> {
    let listing = state.browser.find_repositories(query.path.as_deref()).await?;
    Ok(Json(listing))
}
