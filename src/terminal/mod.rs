//! Terminal streaming
//!
//! - `TerminalBroker` - one live viewer per session, FIFO output pump
//! - `ProcessSupervisor` / `PtySupervisor` - launching session programs
//! - `InputFrame` - decoded viewer input

mod broker;
mod frame;
mod process;
mod pty;

pub use broker::*;
pub use frame::*;
pub use process::*;
pub use pty::*;
