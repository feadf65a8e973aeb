//! Git worktree management
//!
//! Provides worktree lifecycle operations:
//! - Create worktree with new or existing branch
//! - Remove worktree
//! - List worktrees

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::GitBackend;
use crate::error::GitError;

/// Worktree information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    /// Path to the worktree
    pub path: PathBuf,
    /// Branch name
    pub branch: String,
    /// HEAD commit ID
    pub head: String,
    /// Whether this is the main worktree
    pub is_main: bool,
}

/// Worktree manager
///
/// gitoxide's worktree support is still evolving, so reads go through
/// gitoxide and mutations through the git CLI. The gitoxide handle is opened
/// per query and never held across an await.
#[derive(Debug, Clone)]
pub struct WorktreeManager {
    repo_path: PathBuf,
}

impl WorktreeManager {
    /// Create a manager for the repository containing `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GitError> {
        let backend = GitBackend::discover(path)?;
        Ok(Self {
            repo_path: backend.path().to_path_buf(),
        })
    }

    /// Get the repository path
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Current branch of the main worktree
    pub fn current_branch(&self) -> Result<String, GitError> {
        GitBackend::open(&self.repo_path)?.current_branch()
    }

    /// Create a worktree at `worktree_path`.
    ///
    /// An existing branch is checked out; otherwise the branch is created
    /// from `base_branch`.
    #[instrument(skip(self))]
    pub async fn create_worktree(
        &self,
        worktree_path: &Path,
        branch_name: &str,
        base_branch: &str,
    ) -> Result<WorktreeInfo, GitError> {
        if worktree_path.exists() {
            return Err(GitError::WorktreeExists(worktree_path.to_path_buf()));
        }

        if let Some(parent) = worktree_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                GitError::WorktreeError(format!("Failed to create worktrees dir: {}", e))
            })?;
        }

        let branch_exists = GitBackend::open(&self.repo_path)?.branch_exists(branch_name)?;

        let mut cmd = Command::new("git");
        cmd.current_dir(&self.repo_path)
            .arg("worktree")
            .arg("add");

        if branch_exists {
            debug!("Branch {} exists, checking out", branch_name);
            cmd.arg(worktree_path).arg(branch_name);
        } else {
            debug!("Creating branch {} from {}", branch_name, base_branch);
            cmd.arg("-b")
                .arg(branch_name)
                .arg(worktree_path)
                .arg(base_branch);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = cmd
            .output()
            .await
            .map_err(|e| GitError::WorktreeError(format!("Failed to run git worktree: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitError::WorktreeError(format!(
                "git worktree add failed: {}",
                stderr.trim()
            )));
        }

        info!(
            "Created worktree at {:?} with branch {} (base {})",
            worktree_path, branch_name, base_branch
        );

        let head = worktree_head(worktree_path).await;

        Ok(WorktreeInfo {
            path: worktree_path.to_path_buf(),
            branch: branch_name.to_string(),
            head,
            is_main: false,
        })
    }

    /// Remove a worktree
    #[instrument(skip(self))]
    pub async fn remove_worktree(&self, worktree_path: &Path, force: bool) -> Result<(), GitError> {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.repo_path)
            .arg("worktree")
            .arg("remove");

        if force {
            cmd.arg("--force");
        }

        cmd.arg(worktree_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = cmd
            .output()
            .await
            .map_err(|e| GitError::WorktreeError(format!("Failed to run git worktree: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitError::WorktreeError(format!(
                "git worktree remove failed: {}",
                stderr.trim()
            )));
        }

        info!("Removed worktree at {:?}", worktree_path);
        Ok(())
    }

    /// List all worktrees
    #[instrument(skip(self))]
    pub async fn list_worktrees(&self) -> Result<Vec<WorktreeInfo>, GitError> {
        let output = Command::new("git")
            .current_dir(&self.repo_path)
            .args(["worktree", "list", "--porcelain"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| GitError::WorktreeError(format!("Failed to list worktrees: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitError::WorktreeError(format!(
                "git worktree list failed: {}",
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_worktree_list(&stdout))
    }
}

/// HEAD commit of a worktree, or `unknown` when it cannot be read.
///
/// Never fails: the worktree already exists when this runs and must not be
/// left behind by an error here.
async fn worktree_head(worktree_path: &Path) -> String {
    let output = Command::new("git")
        .current_dir(worktree_path)
        .args(["rev-parse", "HEAD"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        }
        Ok(_) => "unknown".to_string(),
        Err(e) => {
            warn!("Failed to read HEAD of {:?}: {}", worktree_path, e);
            "unknown".to_string()
        }
    }
}

/// Parse `git worktree list --porcelain` output
pub fn parse_worktree_list(output: &str) -> Vec<WorktreeInfo> {
    let mut worktrees = Vec::new();
    let mut current_path: Option<PathBuf> = None;
    let mut current_head: Option<String> = None;
    let mut current_branch: Option<String> = None;
    let mut is_main = true; // First worktree is main

    let mut flush = |path: Option<PathBuf>,
                     head: Option<String>,
                     branch: Option<String>,
                     is_main: &mut bool| {
        if let (Some(path), Some(head)) = (path, head) {
            worktrees.push(WorktreeInfo {
                path,
                branch: branch.unwrap_or_else(|| "HEAD".to_string()),
                head,
                is_main: *is_main,
            });
            *is_main = false;
        }
    };

    for line in output.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            flush(
                current_path.take(),
                current_head.take(),
                current_branch.take(),
                &mut is_main,
            );
            current_path = Some(PathBuf::from(path));
        } else if let Some(head) = line.strip_prefix("HEAD ") {
            current_head = Some(head.to_string());
        } else if let Some(branch) = line.strip_prefix("branch ") {
            let branch = branch.strip_prefix("refs/heads/").unwrap_or(branch);
            current_branch = Some(branch.to_string());
        }
    }

    flush(current_path, current_head, current_branch, &mut is_main);
    worktrees
}
