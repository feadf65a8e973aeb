//! Filesystem-backed directory browser

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use directories::UserDirs;
use tracing::{debug, instrument, warn};

use super::{
    DirectoryBrowser, DirectoryEntry, DirectoryListing, MAX_SEARCH_DEPTH, RepositoryInfo,
    RepositoryListing,
};
use crate::error::Result;
use crate::git::{GitBackend, WorktreeManager};

/// Browser over the local filesystem
#[derive(Debug, Clone, Default)]
pub struct FsBrowser;

impl FsBrowser {
    pub fn new() -> Self {
        Self
    }

    /// Directory a request refers to: home when none is given, otherwise the
    /// normalized absolute path
    fn resolve(&self, path: Option<&Path>) -> Result<PathBuf> {
        match path {
            Some(p) if !p.as_os_str().is_empty() => {
                if !p.is_absolute() {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("path must be absolute: {}", p.display()),
                    )
                    .into());
                }
                Ok(clean(p))
            }
            _ => Ok(self.home()),
        }
    }
}

/// Lexically normalize a path: drop `.` and fold `..` into its parent
fn clean(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}

#[async_trait]
impl DirectoryBrowser for FsBrowser {
    fn home(&self) -> PathBuf {
        UserDirs::new()
            .map(|dirs| dirs.home_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("/"))
    }

    #[instrument(skip(self))]
    async fn list(&self, path: Option<&Path>) -> Result<DirectoryListing> {
        let current = self.resolve(path)?;

        let mut items = Vec::new();
        if let Some(parent) = current.parent() {
            items.push(DirectoryEntry {
                name: "..".to_string(),
                path: parent.to_path_buf(),
                is_repo_root: false,
            });
        }

        let mut children = Vec::new();
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            if !entry.file_type().await?.is_dir() {
                continue;
            }

            let path = entry.path();
            children.push(DirectoryEntry {
                is_repo_root: self.is_repo_root(&path),
                name,
                path,
            });
        }
        children.sort_by(|a, b| a.name.cmp(&b.name));
        items.extend(children);

        debug!("Listed {} entries in {:?}", items.len(), current);
        Ok(DirectoryListing {
            current_path: current,
            items,
        })
    }

    fn is_repo_root(&self, path: &Path) -> bool {
        GitBackend::is_repo_root(path)
    }

    #[instrument(skip(self))]
    async fn find_repositories(&self, path: Option<&Path>) -> Result<RepositoryListing> {
        let search_path = self.resolve(path)?;

        let root = search_path.clone();
        let found = tokio::task::spawn_blocking(move || {
            let mut found = Vec::new();
            walk_repositories(&root, 0, &mut found);
            found
        })
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?;

        let mut repos = Vec::with_capacity(found.len());
        for repo_path in found {
            repos.push(describe_repository(repo_path).await);
        }

        Ok(RepositoryListing { search_path, repos })
    }
}

/// Collect repository roots below `dir`, descending at most `MAX_SEARCH_DEPTH` levels
fn walk_repositories(dir: &Path, depth: usize, found: &mut Vec<PathBuf>) {
    if GitBackend::is_repo_root(dir) {
        found.push(dir.to_path_buf());
    }
    if depth >= MAX_SEARCH_DEPTH {
        return;
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Skipping {:?}: {}", dir, e);
            return;
        }
    };

    let mut subdirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.path())
        .collect();
    subdirs.sort();

    for sub in subdirs {
        walk_repositories(&sub, depth + 1, found);
    }
}

async fn describe_repository(path: PathBuf) -> RepositoryInfo {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let current_branch = GitBackend::open(&path)
        .and_then(|backend| backend.current_branch())
        .unwrap_or_default();

    let worktrees = match WorktreeManager::open(&path) {
        Ok(manager) => match manager.list_worktrees().await {
            Ok(list) => list.into_iter().map(|w| w.path).collect(),
            Err(e) => {
                warn!("Failed to list worktrees for {:?}: {}", path, e);
                Vec::new()
            }
        },
        Err(_) => Vec::new(),
    };

    RepositoryInfo {
        name,
        path,
        current_branch,
        worktrees,
    }
}
