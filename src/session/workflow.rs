//! Session creation workflow
//!
//! Validates a create request, provisions the working copy and registers
//! the record. Either all of it happens or none of it: a registration
//! failure removes the freshly provisioned worktree again.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::sanitize::{default_branch_name, sanitize_for_git};
use super::{Session, SessionRegistry, SessionSpec};
use crate::browser::DirectoryBrowser;
use crate::error::{Result, ValidationError};
use crate::git::{RepositoryProvisioner, WorktreeRequest};

/// Create request as sent by clients
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub repo_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_branch: Option<String>,
    #[serde(default)]
    pub use_worktree: bool,
}

/// Naming defaults applied when a request leaves them out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowSettings {
    pub branch_prefix: String,
    pub default_base_branch: String,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            branch_prefix: "feature".to_string(),
            default_base_branch: "main".to_string(),
        }
    }
}

pub struct CreationWorkflow {
    registry: Arc<SessionRegistry>,
    browser: Arc<dyn DirectoryBrowser>,
    provisioner: Arc<dyn RepositoryProvisioner>,
    settings: WorkflowSettings,
}

impl CreationWorkflow {
    pub fn new(
        registry: Arc<SessionRegistry>,
        browser: Arc<dyn DirectoryBrowser>,
        provisioner: Arc<dyn RepositoryProvisioner>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            registry,
            browser,
            provisioner,
            settings,
        }
    }

    /// Validate, provision and register a new session.
    ///
    /// The returned record is in `creating`; launching the process is the
    /// caller's job.
    #[instrument(skip(self, request), fields(name = %request.name, repo = %request.repo_path.display()))]
    pub async fn submit(&self, request: CreateRequest) -> Result<Session> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(ValidationError::MissingName.into());
        }

        let repo_path = request.repo_path;
        if repo_path.as_os_str().is_empty() || !self.browser.is_repo_root(&repo_path) {
            return Err(ValidationError::InvalidRepository(repo_path).into());
        }

        let clean_name = sanitize_for_git(name);
        let base_branch = non_blank(request.base_branch)
            .unwrap_or_else(|| self.settings.default_base_branch.clone());

        let (path, branch) = if request.use_worktree {
            let branch = match non_blank(request.branch_name) {
                Some(branch) => sanitize_for_git(&branch),
                None => default_branch_name(&self.settings.branch_prefix, name),
            };
            let worktree = WorktreeRequest {
                repo_path: repo_path.clone(),
                session_name: clean_name,
                branch: branch.clone(),
                base_branch: base_branch.clone(),
            };
            let path = self.provisioner.provision(&worktree).await?;
            (path, branch)
        } else {
            // Nothing is checked out, so the session reports what the repository is on
            let branch = match self.provisioner.current_branch(&repo_path).await {
                Ok(branch) => branch,
                Err(e) => {
                    warn!("Could not read current branch of {:?}: {}", repo_path, e);
                    "HEAD".to_string()
                }
            };
            (repo_path.clone(), branch)
        };

        let spec = SessionSpec {
            name: name.to_string(),
            repo_path: repo_path.clone(),
            path: path.clone(),
            branch,
            base_branch,
            use_worktree: request.use_worktree,
        };

        match self.registry.create(spec).await {
            Ok(session) => {
                info!(
                    "Created session {} on {} at {:?}",
                    session.id.short(),
                    session.branch,
                    session.path
                );
                Ok(session)
            }
            Err(e) => {
                if request.use_worktree {
                    self.rollback(&repo_path, &path).await;
                }
                Err(e)
            }
        }
    }

    async fn rollback(&self, repo_path: &Path, path: &Path) {
        if let Err(e) = self.provisioner.cleanup(repo_path, path).await {
            warn!("Failed to clean up worktree {:?}: {}", path, e);
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl From<&crate::config::Config> for WorkflowSettings {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            branch_prefix: config.branch_prefix.clone(),
            default_base_branch: config.default_base_branch.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use crate::browser::{DirectoryListing, RepositoryListing};
    use crate::error::{Error, GitError};
    use crate::session::SessionStatus;

    struct OneRepo(PathBuf);

    #[async_trait]
    impl DirectoryBrowser for OneRepo {
        fn home(&self) -> PathBuf {
            PathBuf::from("/")
        }
        async fn list(&self, _path: Option<&Path>) -> Result<DirectoryListing> {
            unimplemented!()
        }
        fn is_repo_root(&self, path: &Path) -> bool {
            path == self.0
        }
        async fn find_repositories(&self, _path: Option<&Path>) -> Result<RepositoryListing> {
            unimplemented!()
        }
    }

    #[derive(Default)]
    struct RecordingProvisioner {
        provisioned: Mutex<Vec<WorktreeRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl RepositoryProvisioner for RecordingProvisioner {
        async fn provision(&self, request: &WorktreeRequest) -> std::result::Result<PathBuf, GitError> {
            if self.fail {
                return Err(GitError::WorktreeError("fatal: invalid reference: main".into()));
            }
            self.provisioned.lock().unwrap().push(request.clone());
            Ok(PathBuf::from(format!("/work/app-{}", request.session_name)))
        }
        async fn current_branch(&self, _repo: &Path) -> std::result::Result<String, GitError> {
            Ok("develop".to_string())
        }
        async fn cleanup(&self, _repo: &Path, _worktree: &Path) -> std::result::Result<(), GitError> {
            Ok(())
        }
    }

    fn workflow(provisioner: Arc<RecordingProvisioner>) -> (Arc<SessionRegistry>, CreationWorkflow) {
        let registry = Arc::new(SessionRegistry::new());
        let workflow = CreationWorkflow::new(
            registry.clone(),
            Arc::new(OneRepo(PathBuf::from("/work/app"))),
            provisioner,
            WorkflowSettings::default(),
        );
        (registry, workflow)
    }

    fn request(name: &str) -> CreateRequest {
        CreateRequest {
            name: name.to_string(),
            repo_path: PathBuf::from("/work/app"),
            use_worktree: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_default_branch_and_base() {
        let provisioner = Arc::new(RecordingProvisioner::default());
        let (registry, workflow) = workflow(provisioner.clone());

        let session = workflow.submit(request("fix-bug")).await.unwrap();
        assert_eq!(session.branch, "feature/fix-bug");
        assert_eq!(session.base_branch, "main");
        assert_eq!(session.status, SessionStatus::Creating);
        assert_eq!(session.path, PathBuf::from("/work/app-fix-bug"));
        assert_eq!(registry.len().await, 1);

        let provisioned = provisioner.provisioned.lock().unwrap();
        assert_eq!(provisioned[0].base_branch, "main");
    }

    #[tokio::test]
    async fn test_name_is_sanitized_for_branch() {
        let provisioner = Arc::new(RecordingProvisioner::default());
        let (_registry, workflow) = workflow(provisioner);

        let session = workflow.submit(request("My Feature!!")).await.unwrap();
        assert_eq!(session.name, "My Feature!!");
        assert_eq!(session.branch, "feature/my-feature");
    }

    #[tokio::test]
    async fn test_explicit_branch_and_base() {
        let provisioner = Arc::new(RecordingProvisioner::default());
        let (_registry, workflow) = workflow(provisioner.clone());

        let mut req = request("x");
        req.branch_name = Some("Bugfix/Login Page".to_string());
        req.base_branch = Some("develop".to_string());
        let session = workflow.submit(req).await.unwrap();

        assert_eq!(session.branch, "bugfix/login-page");
        assert_eq!(session.base_branch, "develop");
    }

    #[tokio::test]
    async fn test_missing_name_checked_first() {
        let provisioner = Arc::new(RecordingProvisioner::default());
        let (registry, workflow) = workflow(provisioner);

        let req = CreateRequest {
            name: "   ".to_string(),
            repo_path: PathBuf::from("/not/a/repo"),
            ..Default::default()
        };
        let err = workflow.submit(req).await.unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::MissingName)));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_invalid_repository() {
        let provisioner = Arc::new(RecordingProvisioner::default());
        let (registry, workflow) = workflow(provisioner);

        let mut req = request("x");
        req.repo_path = PathBuf::from("/tmp/plain");
        let err = workflow.submit(req).await.unwrap_err();
        assert_eq!(err.to_string(), "Validation error: invalid repository: /tmp/plain");

        let mut req = request("x");
        req.repo_path = PathBuf::new();
        assert!(workflow.submit(req).await.is_err());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_provisioning_failure_leaves_no_record() {
        let provisioner = Arc::new(RecordingProvisioner {
            fail: true,
            ..Default::default()
        });
        let (registry, workflow) = workflow(provisioner);

        let err = workflow.submit(request("x")).await.unwrap_err();
        assert!(matches!(err, Error::Provisioning(_)));
        assert!(err.to_string().contains("invalid reference: main"));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_without_worktree_uses_repository() {
        let provisioner = Arc::new(RecordingProvisioner::default());
        let (_registry, workflow) = workflow(provisioner.clone());

        let mut req = request("in place");
        req.use_worktree = false;
        let session = workflow.submit(req).await.unwrap();

        assert_eq!(session.path, PathBuf::from("/work/app"));
        assert_eq!(session.branch, "develop");
        assert!(!session.use_worktree);
        assert!(provisioner.provisioned.lock().unwrap().is_empty());
    }

    #[test]
    fn test_request_wire_format() {
        let req: CreateRequest = serde_json::from_str(
            r#"{"name":"fix-bug","repoPath":"/work/app","branchName":"","useWorktree":true}"#,
        )
        .unwrap();
        assert_eq!(req.name, "fix-bug");
        assert_eq!(req.branch_name.as_deref(), Some(""));
        assert!(req.base_branch.is_none());
        assert!(req.use_worktree);
    }
}
