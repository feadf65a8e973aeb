//! Process supervision seam
//!
//! The broker never touches a process directly. It receives a
//! [`ProcessIo`] from a [`ProcessSupervisor`] and pumps bytes through its
//! channels; the output channel closing means the process is gone.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::StreamError;
use crate::session::{Session, SessionId};

/// Byte channels of a running process
#[derive(Debug)]
pub struct ProcessIo {
    /// OS process id, when there is one
    pub pid: Option<u32>,
    /// Bytes written here reach the process's terminal input
    pub input: mpsc::Sender<Bytes>,
    /// Terminal output in production order; closes when the process exits
    pub output: mpsc::Receiver<Bytes>,
}

/// Launches and stops the interactive program of a session
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Launch the program in the session's working copy
    async fn start(&self, session: &Session) -> Result<ProcessIo, StreamError>;

    /// Stop the program and wait for it to exit.
    ///
    /// Succeeds when the process is already gone.
    async fn terminate(&self, id: &SessionId) -> Result<(), StreamError>;
}
