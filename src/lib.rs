//! Claude Manager - session lifecycle and terminal streaming coordinator
//!
//! Runs coding-agent processes in git worktrees and streams their terminals
//! to remote viewers over WebSocket.
//!
//! # Architecture
//!
//! - **SessionRegistry** - authoritative store of session records and their
//!   lifecycle state machine
//! - **CreationWorkflow** - validates create requests and provisions worktrees
//! - **PtySupervisor** - one pseudo-terminal process per session
//! - **TerminalBroker** - routes process output to the attached viewer and
//!   viewer input back to the process
//! - **Reconciler** - polls a session listing and emits change events
//! - **Coordinator** - composition root tying the above together
//!
//! # Modules
//!
//! - [`session`] - records, state machine, creation workflow
//! - [`terminal`] - process supervision and stream brokering
//! - [`git`] - worktree provisioning via gitoxide and the git CLI
//! - [`browser`] - directory listing and repository discovery
//! - [`reconcile`] - polling client state
//! - [`server`] - HTTP and WebSocket surface
//! - [`client`] - CLI client of a running server
//! - [`config`] - layered configuration
//! - [`error`] - Error types

pub mod browser;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod git;
pub mod reconcile;
pub mod server;
pub mod session;
pub mod terminal;

pub use config::Config;
pub use coordinator::Coordinator;
pub use error::{Error, Result};
pub use session::{Session, SessionId, SessionStatus, SessionSummary};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
