//! Repository provisioning for new sessions
//!
//! The creation workflow only sees [`RepositoryProvisioner`]; the default
//! [`GitProvisioner`] places one worktree per session next to the repository
//! (or under a configured worktrees directory).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use super::WorktreeManager;
use crate::error::GitError;
use crate::session::sanitize::sanitize_for_path;

/// What to check out for a new session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeRequest {
    /// Repository the worktree belongs to
    pub repo_path: PathBuf,
    /// Sanitized session name, used for the directory name
    pub session_name: String,
    /// Branch to check out (created from `base_branch` if missing)
    pub branch: String,
    /// Branch to fork from
    pub base_branch: String,
}

/// Provides isolated working copies for sessions
#[async_trait]
pub trait RepositoryProvisioner: Send + Sync {
    /// Create a working copy and return its path
    async fn provision(&self, request: &WorktreeRequest) -> Result<PathBuf, GitError>;

    /// Branch currently checked out in `repo_path`
    async fn current_branch(&self, repo_path: &Path) -> Result<String, GitError>;

    /// Remove a working copy created by [`provision`](Self::provision)
    async fn cleanup(&self, repo_path: &Path, worktree_path: &Path) -> Result<(), GitError>;
}

/// Provisioner backed by `git worktree`
#[derive(Debug, Clone, Default)]
pub struct GitProvisioner {
    worktrees_dir: Option<PathBuf>,
}

impl GitProvisioner {
    /// Worktrees go next to their repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Worktrees go under `dir`
    pub fn with_worktrees_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            worktrees_dir: Some(dir.into()),
        }
    }

    /// Where the worktree for `request` lives: `<repo-name>-<session-name>`
    pub fn worktree_path(&self, request: &WorktreeRequest) -> PathBuf {
        let repo_name = request
            .repo_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dir_name = format!(
            "{}-{}",
            sanitize_for_path(&repo_name),
            sanitize_for_path(&request.session_name)
        );

        let parent = match &self.worktrees_dir {
            Some(dir) => dir.clone(),
            None => request
                .repo_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| request.repo_path.clone()),
        };

        parent.join(dir_name)
    }
}

#[async_trait]
impl RepositoryProvisioner for GitProvisioner {
    #[instrument(skip(self), fields(repo = %request.repo_path.display(), branch = %request.branch))]
    async fn provision(&self, request: &WorktreeRequest) -> Result<PathBuf, GitError> {
        let manager = WorktreeManager::open(&request.repo_path)?;
        let path = self.worktree_path(request);

        let worktree = manager
            .create_worktree(&path, &request.branch, &request.base_branch)
            .await?;

        info!("Provisioned worktree {:?}", worktree.path);
        Ok(worktree.path)
    }

    async fn current_branch(&self, repo_path: &Path) -> Result<String, GitError> {
        WorktreeManager::open(repo_path)?.current_branch()
    }

    #[instrument(skip(self))]
    async fn cleanup(&self, repo_path: &Path, worktree_path: &Path) -> Result<(), GitError> {
        let removed = match WorktreeManager::open(repo_path) {
            Ok(manager) => manager.remove_worktree(worktree_path, true).await,
            Err(e) => Err(e),
        };

        if let Err(e) = removed {
            warn!("git worktree remove failed, deleting directory: {}", e);
            if worktree_path.exists() {
                tokio::fs::remove_dir_all(worktree_path).await.map_err(|e| {
                    GitError::WorktreeError(format!(
                        "Failed to remove {}: {}",
                        worktree_path.display(),
                        e
                    ))
                })?;
            }
        }

        Ok(())
    }
}
