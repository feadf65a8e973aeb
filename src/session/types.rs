//! Core session types
//!
//! Defines the session record and its lifecycle:
//! - `Session` is the authoritative record kept by the registry
//! - `SessionSummary` is the wire shape used by listings and the reconciler
//! - `SessionStatus` encodes the lifecycle state machine

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// First 8 chars, for log lines and compact listings
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle status of a session
///
/// ```text
/// creating -> starting -> active -> idle  -> active
///                                -> error -> active
/// (any) -> terminated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Record registered, worktree provisioned, process not yet launched
    Creating,
    /// Process is being launched
    Starting,
    /// Process running with a viewer attached (or freshly started)
    Active,
    /// Process running, no viewer attached
    Idle,
    /// Stream failure or lifecycle defect
    Error,
    /// Process gone; absorbing state
    Terminated,
}

impl SessionStatus {
    /// Check whether `self -> to` is an edge of the lifecycle state machine
    pub fn can_transition_to(&self, to: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, to) {
            (Terminated, _) => false,
            (_, Terminated) => true,
            (Creating, Starting)
            | (Starting, Active)
            | (Active, Idle)
            | (Active, Error)
            | (Idle, Active)
            | (Error, Active) => true,
            _ => false,
        }
    }

    /// Check if the session has a live process
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Active | Self::Idle | Self::Error)
    }

    /// Check if a viewer may attach
    pub fn can_attach(&self) -> bool {
        self.is_running()
    }

    /// Check if the session reached the absorbing state
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Starting => write!(f, "starting"),
            Self::Active => write!(f, "active"),
            Self::Idle => write!(f, "idle"),
            Self::Error => write!(f, "error"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Validated input for [`SessionRegistry::create`](super::SessionRegistry::create)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSpec {
    /// Display name as typed by the user
    pub name: String,
    /// Repository the session was created from
    pub repo_path: PathBuf,
    /// Working copy the process runs in (worktree or the repository itself)
    pub path: PathBuf,
    /// Branch checked out in the working copy
    pub branch: String,
    /// Branch the worktree was forked from
    pub base_branch: String,
    /// Whether `path` is a dedicated worktree
    pub use_worktree: bool,
}

/// Session record owned by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier
    pub id: SessionId,
    /// User-friendly name
    pub name: String,
    /// Path to the working copy
    pub path: PathBuf,
    /// Git branch name
    pub branch: String,
    /// Branch the worktree was created from
    pub base_branch: String,
    /// Repository the working copy belongs to
    pub repo_path: PathBuf,
    /// Whether the working copy is a dedicated worktree
    pub use_worktree: bool,
    /// Current status
    pub status: SessionStatus,
    /// Process id once the program is running
    pub pid: Option<u32>,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// When the session last changed state
    pub last_seen: DateTime<Utc>,
}

impl Session {
    /// Create a new session record in `creating`
    pub fn new(spec: SessionSpec) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            name: spec.name,
            path: spec.path,
            branch: spec.branch,
            base_branch: spec.base_branch,
            repo_path: spec.repo_path,
            use_worktree: spec.use_worktree,
            status: SessionStatus::Creating,
            pid: None,
            created_at: now,
            last_seen: now,
        }
    }

    /// Update the session status
    pub fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
        self.touch();
    }

    /// Mark the session as seen (update last_seen)
    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
    }

    /// Project the record onto its wire shape
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            name: self.name.clone(),
            path: self.path.clone(),
            branch: self.branch.clone(),
            status: self.status,
        }
    }
}

/// Listing entry: `{id, name, path, branch, status}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub name: String,
    pub path: PathBuf,
    pub branch: String,
    pub status: SessionStatus,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        session.summary()
    }
}
