//! Git backend using pure gitoxide
//!
//! Read-only repository queries used by the directory browser and the
//! provisioner. Mutations go through the git CLI (see `worktree`).

use std::path::{Path, PathBuf};

use gix::Repository;
use tracing::{debug, instrument};

use crate::error::GitError;

/// Git backend using gitoxide
pub struct GitBackend {
    /// The gitoxide repository handle
    repo: Repository,
    /// Path to the repository work tree
    path: PathBuf,
}

impl GitBackend {
    /// Open an existing repository
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GitError> {
        let path = path.as_ref().to_path_buf();

        let repo = gix::open(&path).map_err(|e| {
            if e.to_string().contains("not a git repository") {
                GitError::NotARepository(path.clone())
            } else {
                GitError::Gix(e.to_string())
            }
        })?;

        debug!("Opened repository at {:?}", path);

        Ok(Self { repo, path })
    }

    /// Discover repository from a path (searches parent directories)
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn discover(path: impl AsRef<Path>) -> Result<Self, GitError> {
        let path = path.as_ref();

        let repo = gix::discover(path).map_err(|_e| GitError::NotARepository(path.to_path_buf()))?;

        let repo_path = repo
            .work_dir()
            .or_else(|| repo.path().parent())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| path.to_path_buf());

        debug!("Discovered repository at {:?}", repo_path);

        Ok(Self {
            repo,
            path: repo_path,
        })
    }

    /// Whether `path` is the top of a repository (has its own `.git` entry).
    ///
    /// A `.git` file counts too, so linked worktrees are repository roots.
    pub fn is_repo_root(path: impl AsRef<Path>) -> bool {
        path.as_ref().join(".git").exists()
    }

    /// Get the repository path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the current branch name
    pub fn current_branch(&self) -> Result<String, GitError> {
        let head = self.repo.head().map_err(|e| GitError::Gix(e.to_string()))?;

        match head.kind {
            gix::head::Kind::Symbolic(reference) => Ok(reference.name.shorten().to_string()),
            gix::head::Kind::Detached { .. } => match head.id() {
                Some(id) => {
                    let id_str = id.to_string();
                    let short = if id_str.len() > 8 { &id_str[..8] } else { &id_str };
                    Ok(format!("HEAD detached at {}", short))
                }
                None => Ok("HEAD (no commits)".to_string()),
            },
            gix::head::Kind::Unborn(full_name) => Ok(full_name.shorten().to_string()),
        }
    }

    /// Check if a branch exists
    pub fn branch_exists(&self, branch_name: &str) -> Result<bool, GitError> {
        let refs = self.repo.references().map_err(|e| GitError::Gix(e.to_string()))?;

        let branch_ref = format!("refs/heads/{}", branch_name);

        for reference in refs.all().map_err(|e| GitError::Gix(e.to_string()))? {
            match reference {
                Ok(r) => {
                    if r.name().as_bstr() == branch_ref.as_bytes() {
                        return Ok(true);
                    }
                }
                Err(_) => continue,
            }
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn init_test_repo() -> (TempDir, GitBackend) {
        let temp_dir = TempDir::new().unwrap();

        let repo = gix::init(temp_dir.path()).unwrap();

        let backend = GitBackend {
            repo,
            path: temp_dir.path().to_path_buf(),
        };

        (temp_dir, backend)
    }

    #[test]
    fn test_current_branch_unborn() {
        let (_temp, backend) = init_test_repo();
        // Unborn branches still resolve to a name
        assert!(!backend.current_branch().unwrap().is_empty());
    }

    #[test]
    fn test_is_repo_root() {
        let (temp, _backend) = init_test_repo();
        assert!(GitBackend::is_repo_root(temp.path()));

        let sub = temp.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        assert!(!GitBackend::is_repo_root(&sub));
    }

    #[test]
    fn test_open_non_repo() {
        let temp = TempDir::new().unwrap();
        assert!(GitBackend::open(temp.path()).is_err());
    }
}
