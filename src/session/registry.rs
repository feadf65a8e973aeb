//! Session registry - authoritative store of session records
//!
//! All lifecycle state lives here. Readers get owned snapshots so they can
//! iterate while writers proceed; writers are serialized by a single lock,
//! which also serializes competing transitions on the same session.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, SessionError};
use crate::session::{Session, SessionId, SessionSpec, SessionStatus};

#[derive(Debug)]
struct Entry {
    /// Insertion order, breaks ties between equal creation timestamps
    seq: u64,
    session: Session,
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<SessionId, Entry>,
    next_seq: u64,
}

/// Authoritative mapping of session identifiers to session records
#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: RwLock<Inner>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session in `creating`
    #[instrument(skip(self, spec), fields(name = %spec.name))]
    pub async fn create(&self, spec: SessionSpec) -> Result<Session> {
        validate_spec(&spec)?;

        let session = Session::new(spec);
        let mut inner = self.inner.write().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.sessions.insert(
            session.id,
            Entry {
                seq,
                session: session.clone(),
            },
        );

        info!("Registered session {} ({})", session.id.short(), session.name);
        Ok(session)
    }

    /// Get a snapshot of one session
    pub async fn get(&self, id: &SessionId) -> Result<Session> {
        let inner = self.inner.read().await;
        inner
            .sessions
            .get(id)
            .map(|e| e.session.clone())
            .ok_or_else(|| SessionError::NotFound(*id).into())
    }

    /// Snapshot of all sessions, oldest first
    pub async fn list(&self) -> Vec<Session> {
        let inner = self.inner.read().await;
        let mut entries: Vec<&Entry> = inner.sessions.values().collect();
        entries.sort_by(|a, b| {
            a.session
                .created_at
                .cmp(&b.session.created_at)
                .then(a.seq.cmp(&b.seq))
        });
        entries.into_iter().map(|e| e.session.clone()).collect()
    }

    /// Number of registered sessions
    pub async fn len(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    /// Whether the registry is empty
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Move a session along the lifecycle state machine
    #[instrument(skip(self))]
    pub async fn transition(&self, id: &SessionId, to: SessionStatus) -> Result<Session> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .sessions
            .get_mut(id)
            .ok_or(SessionError::NotFound(*id))?;

        let from = entry.session.status;
        if !from.can_transition_to(to) {
            return Err(SessionError::IllegalTransition { id: *id, from, to }.into());
        }

        entry.session.set_status(to);
        debug!("Session {} {} -> {}", id.short(), from, to);
        Ok(entry.session.clone())
    }

    /// Request termination; a no-op for absent or terminated sessions
    #[instrument(skip(self))]
    pub async fn kill(&self, id: &SessionId) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(id) {
            Some(entry) if !entry.session.status.is_terminated() => {
                let from = entry.session.status;
                entry.session.set_status(SessionStatus::Terminated);
                info!("Session {} {} -> terminated", id.short(), from);
            }
            Some(_) => debug!("Session {} already terminated", id.short()),
            None => debug!("Kill for unknown session {}", id.short()),
        }
        Ok(())
    }

    /// Purge a terminated record
    #[instrument(skip(self))]
    pub async fn remove(&self, id: &SessionId) -> Result<Option<Session>> {
        let mut inner = self.inner.write().await;
        match inner.sessions.get(id) {
            None => Ok(None),
            Some(entry) if !entry.session.status.is_terminated() => {
                Err(SessionError::NotTerminated(*id).into())
            }
            Some(_) => {
                let removed = inner.sessions.remove(id).map(|e| e.session);
                info!("Removed session {}", id.short());
                Ok(removed)
            }
        }
    }

    /// Force a session into `error` outside the edge table.
    ///
    /// Used when a lifecycle defect or launch failure leaves a session in a
    /// state the state machine cannot leave normally. Terminated sessions are
    /// left alone. Returns whether the status changed.
    pub async fn degrade(&self, id: &SessionId, reason: &str) -> bool {
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(id) {
            Some(entry)
                if !entry.session.status.is_terminated()
                    && entry.session.status != SessionStatus::Error =>
            {
                warn!(
                    "Session {} forced {} -> error: {}",
                    id.short(),
                    entry.session.status,
                    reason
                );
                entry.session.set_status(SessionStatus::Error);
                true
            }
            _ => false,
        }
    }

    /// Record the process id of a running session
    pub async fn set_pid(&self, id: &SessionId, pid: Option<u32>) -> Result<()> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .sessions
            .get_mut(id)
            .ok_or(SessionError::NotFound(*id))?;
        entry.session.pid = pid;
        entry.session.touch();
        Ok(())
    }
}

fn validate_spec(spec: &SessionSpec) -> std::result::Result<(), SessionError> {
    let missing = if spec.name.trim().is_empty() {
        Some("name")
    } else if spec.repo_path.as_os_str().is_empty() {
        Some("repository path")
    } else if spec.path.as_os_str().is_empty() {
        Some("working path")
    } else if spec.branch.trim().is_empty() {
        Some("branch")
    } else {
        None
    };

    match missing {
        Some(field) => Err(SessionError::InvalidSpec(format!("{} is required", field))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    use crate::error::Error;

    fn spec(name: &str) -> SessionSpec {
        SessionSpec {
            name: name.to_string(),
            repo_path: PathBuf::from("/repos/app"),
            path: PathBuf::from(format!("/repos/app-{}", name)),
            branch: format!("feature/{}", name),
            base_branch: "main".to_string(),
            use_worktree: true,
        }
    }

    async fn active(registry: &SessionRegistry, name: &str) -> SessionId {
        let id = registry.create(spec(name)).await.unwrap().id;
        registry.transition(&id, SessionStatus::Starting).await.unwrap();
        registry.transition(&id, SessionStatus::Active).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let registry = SessionRegistry::new();
        let session = registry.create(spec("one")).await.unwrap();

        assert_eq!(session.status, SessionStatus::Creating);
        assert_eq!(registry.get(&session.id).await.unwrap(), session);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_create_rejects_blank_fields() {
        let registry = SessionRegistry::new();

        let mut bad = spec("x");
        bad.name = "  ".to_string();
        assert!(matches!(
            registry.create(bad).await,
            Err(Error::Session(SessionError::InvalidSpec(_)))
        ));

        let mut bad = spec("x");
        bad.branch = String::new();
        assert!(registry.create(bad).await.is_err());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let registry = SessionRegistry::new();
        let err = registry.get(&SessionId::new()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_ordered_by_creation() {
        let registry = SessionRegistry::new();
        let names = ["a", "b", "c", "d"];
        for name in names {
            registry.create(spec(name)).await.unwrap();
        }

        let listed: Vec<String> = registry.list().await.into_iter().map(|s| s.name).collect();
        assert_eq!(listed, names);
    }

    #[tokio::test]
    async fn test_legal_lifecycle() {
        let registry = SessionRegistry::new();
        let id = active(&registry, "life").await;

        registry.transition(&id, SessionStatus::Idle).await.unwrap();
        registry.transition(&id, SessionStatus::Active).await.unwrap();
        registry.transition(&id, SessionStatus::Error).await.unwrap();
        registry.transition(&id, SessionStatus::Active).await.unwrap();
        let session = registry.transition(&id, SessionStatus::Terminated).await.unwrap();
        assert_eq!(session.status, SessionStatus::Terminated);
    }

    #[tokio::test]
    async fn test_illegal_transition_leaves_state_unchanged() {
        let registry = SessionRegistry::new();
        let id = registry.create(spec("bad")).await.unwrap().id;

        let err = registry.transition(&id, SessionStatus::Active).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Session(SessionError::IllegalTransition {
                from: SessionStatus::Creating,
                to: SessionStatus::Active,
                ..
            })
        ));
        assert_eq!(registry.get(&id).await.unwrap().status, SessionStatus::Creating);

        registry.kill(&id).await.unwrap();
        for to in [SessionStatus::Active, SessionStatus::Starting, SessionStatus::Terminated] {
            assert!(registry.transition(&id, to).await.is_err());
        }
        assert_eq!(registry.get(&id).await.unwrap().status, SessionStatus::Terminated);
    }

    #[tokio::test]
    async fn test_transition_unknown_is_not_found() {
        let registry = SessionRegistry::new();
        let err = registry
            .transition(&SessionId::new(), SessionStatus::Starting)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_kill_is_idempotent() {
        let registry = SessionRegistry::new();
        let id = active(&registry, "kill").await;

        registry.kill(&id).await.unwrap();
        registry.kill(&id).await.unwrap();
        registry.kill(&SessionId::new()).await.unwrap();
        assert_eq!(registry.get(&id).await.unwrap().status, SessionStatus::Terminated);
    }

    #[tokio::test]
    async fn test_remove_requires_terminated() {
        let registry = SessionRegistry::new();
        let id = active(&registry, "rm").await;

        assert!(matches!(
            registry.remove(&id).await,
            Err(Error::Session(SessionError::NotTerminated(_)))
        ));

        registry.kill(&id).await.unwrap();
        assert!(registry.remove(&id).await.unwrap().is_some());
        assert!(registry.remove(&id).await.unwrap().is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_degrade() {
        let registry = SessionRegistry::new();
        let id = registry.create(spec("deg")).await.unwrap().id;
        registry.transition(&id, SessionStatus::Starting).await.unwrap();

        assert!(registry.degrade(&id, "spawn failed").await);
        assert_eq!(registry.get(&id).await.unwrap().status, SessionStatus::Error);
        assert!(!registry.degrade(&id, "again").await);

        registry.kill(&id).await.unwrap();
        assert!(!registry.degrade(&id, "late").await);
        assert_eq!(registry.get(&id).await.unwrap().status, SessionStatus::Terminated);
    }

    #[tokio::test]
    async fn test_concurrent_transitions_serialize() {
        let registry = Arc::new(SessionRegistry::new());
        let id = active(&registry, "race").await;

        // Only one of the competing active -> idle transitions can win
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.transition(&id, SessionStatus::Idle).await.is_ok()
            }));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }
}
