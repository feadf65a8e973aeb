//! Directory browsing and repository discovery
//!
//! Backs the repository picker of the create dialog. The workflow also uses
//! [`DirectoryBrowser::is_repo_root`] to validate the requested repository.

mod fs;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use fs::FsBrowser;

use crate::error::Result;

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub name: String,
    pub path: PathBuf,
    pub is_repo_root: bool,
}

/// Contents of one directory: subdirectories only, hidden ones skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryListing {
    pub current_path: PathBuf,
    pub items: Vec<DirectoryEntry>,
}

/// A repository found below a search path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryInfo {
    pub name: String,
    pub path: PathBuf,
    pub current_branch: String,
    pub worktrees: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryListing {
    pub search_path: PathBuf,
    pub repos: Vec<RepositoryInfo>,
}

/// Read-only view of the filesystem
#[async_trait]
pub trait DirectoryBrowser: Send + Sync {
    /// Directory used when no path is given
    fn home(&self) -> PathBuf;

    /// List subdirectories of `path` (home when `None`)
    async fn list(&self, path: Option<&Path>) -> Result<DirectoryListing>;

    /// Whether `path` is the root of a repository
    fn is_repo_root(&self, path: &Path) -> bool;

    /// Repositories at most [`MAX_SEARCH_DEPTH`] levels below `path`
    async fn find_repositories(&self, path: Option<&Path>) -> Result<RepositoryListing>;
}

/// How deep repository discovery descends below the search path
pub const MAX_SEARCH_DEPTH: usize = 3;
