//! Session management module
//!
//! - `Session` / `SessionStatus` - the record and its lifecycle state machine
//! - `SessionRegistry` - authoritative store
//! - `CreationWorkflow` - validate, provision, register
//! - `sanitize` - branch and directory name cleaning

mod registry;
pub mod sanitize;
mod types;
mod workflow;

pub use registry::*;
pub use types::*;
pub use workflow::*;
