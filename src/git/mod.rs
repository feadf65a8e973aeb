//! Git operations
//!
//! - `GitBackend` - read-only gitoxide queries
//! - `WorktreeManager` - worktree lifecycle via the git CLI
//! - `RepositoryProvisioner` - per-session working copies

mod backend;
mod provisioner;
mod worktree;

pub use backend::*;
pub use provisioner::*;
pub use worktree::*;
