//! Error types for claude-manager
//!
//! Uses `thiserror` for ergonomic error definitions with automatic `Display` and `Error` impls.
//!
//! The split mirrors how each failure is handled:
//! - [`ValidationError`] and provisioning failures go back to the user verbatim
//! - [`SessionError::NotFound`] and [`FetchError`] are absorbed where they occur
//! - [`SessionError::IllegalTransition`] degrades a single session to `error`
//! - [`StreamError`] releases the attachment and marks the session `error`

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::session::{SessionId, SessionStatus};

/// Top-level error type for claude-manager
#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Provisioning failed: {0}")]
    Provisioning(#[from] GitError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error refers to a session that no longer exists
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Session(SessionError::NotFound(_)))
    }
}

/// Bad user input on session creation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing name")]
    MissingName,

    #[error("invalid repository: {}", .0.display())]
    InvalidRepository(PathBuf),
}

/// Session registry errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(SessionId),

    #[error("Illegal transition for session {id}: {from} -> {to}")]
    IllegalTransition {
        id: SessionId,
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("Invalid session spec: {0}")]
    InvalidSpec(String),

    #[error("Session {0} is still running and cannot be removed")]
    NotTerminated(SessionId),
}

/// Terminal stream errors
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Session {0} has no running process")]
    NotRunning(SessionId),

    #[error("Session {id} cannot be attached while {status}")]
    NotAttachable { id: SessionId, status: SessionStatus },

    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Process input closed for session {0}")]
    InputClosed(SessionId),

    #[error("Process for session {0} did not exit within {1:?}")]
    KillTimeout(SessionId, Duration),

    #[error("PTY error: {0}")]
    Pty(String),
}

impl From<pty_process::Error> for StreamError {
    fn from(e: pty_process::Error) -> Self {
        StreamError::Pty(e.to_string())
    }
}

impl From<pty_process::Error> for Error {
    fn from(e: pty_process::Error) -> Self {
        Error::Stream(StreamError::Pty(e.to_string()))
    }
}

/// Git operations errors
#[derive(Error, Debug)]
pub enum GitError {
    #[error("Not a git repository: {0}")]
    NotARepository(PathBuf),

    #[error("Git operation failed: {0}")]
    OperationFailed(String),

    #[error("Worktree error: {0}")]
    WorktreeError(String),

    #[error("Worktree directory already exists: {0}")]
    WorktreeExists(PathBuf),

    #[error("Gitoxide error: {0}")]
    Gix(String),
}

/// Session listing fetch errors (transient, retried on the next tick)
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FetchError::Decode(e.to_string())
        } else {
            FetchError::Request(e.to_string())
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),

    #[error("Invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Failed to create config directory: {0}")]
    DirectoryCreationFailed(PathBuf),
}

/// Result type alias using our error type
pub type Result<T> = std::result::Result<T, Error>;

/// Convenience trait for converting gitoxide errors
impl From<gix::open::Error> for GitError {
    fn from(e: gix::open::Error) -> Self {
        GitError::Gix(e.to_string())
    }
}

impl From<gix::discover::Error> for GitError {
    fn from(e: gix::discover::Error) -> Self {
        GitError::Gix(e.to_string())
    }
}
