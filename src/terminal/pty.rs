//! PTY-backed process supervisor
//!
//! Every session runs its program on its own pseudo terminal. Three tasks
//! per process:
//! - reader: PTY output -> output channel (closes on EOF/EIO)
//! - writer: input channel -> PTY
//! - monitor: owns the child, waits for exit or a kill request

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, info, instrument, warn};

use super::{ProcessIo, ProcessSupervisor};
use crate::error::StreamError;
use crate::session::{Session, SessionId};

/// Channel capacity between the PTY tasks and the broker
const CHANNEL_CAPACITY: usize = 256;

/// PTY read size
const READ_CHUNK: usize = 4096;

/// How to launch session programs
#[derive(Debug, Clone)]
pub struct PtySettings {
    /// Preferred program (first word is looked up on PATH)
    pub program: String,
    /// Fallback when the program is not installed; run as `<shell> -i`
    pub shell: String,
    pub cols: u16,
    pub rows: u16,
    /// Upper bound on waiting for a killed process to exit
    pub kill_timeout: Duration,
}

impl Default for PtySettings {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            shell: "bash".to_string(),
            cols: 120,
            rows: 40,
            kill_timeout: Duration::from_secs(5),
        }
    }
}

struct ProcessHandle {
    kill: oneshot::Sender<()>,
    exited: oneshot::Receiver<()>,
}

/// Supervisor running each session program on a PTY
pub struct PtySupervisor {
    settings: PtySettings,
    processes: Arc<Mutex<HashMap<SessionId, ProcessHandle>>>,
}

impl PtySupervisor {
    pub fn new(settings: PtySettings) -> Self {
        Self {
            settings,
            processes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Program and arguments to launch
    fn command_line(&self) -> (String, Vec<String>) {
        resolve_program(&self.settings.program, &self.settings.shell, std::env::var_os("PATH"))
    }
}

#[async_trait]
impl ProcessSupervisor for PtySupervisor {
    #[instrument(skip(self, session), fields(session = %session.id.short(), path = %session.path.display()))]
    async fn start(&self, session: &Session) -> Result<ProcessIo, StreamError> {
        let (program, args) = self.command_line();

        let pty = pty_process::Pty::new()?;
        pty.resize(pty_process::Size::new(self.settings.rows, self.settings.cols))?;

        let mut cmd = pty_process::Command::new(&program);
        cmd.args(&args);
        cmd.current_dir(&session.path);
        cmd.env("TERM", "xterm-256color");
        let mut child = cmd
            .spawn(&pty.pts()?)
            .map_err(|e| StreamError::Spawn(format!("{}: {}", program, e)))?;

        let pid = child.id();
        info!("Spawned {} (pid {:?})", program, pid);

        let (mut pty_reader, mut pty_writer) = tokio::io::split(pty);
        let (output_tx, output_rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);
        let (input_tx, mut input_rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);

        let id = session.id;

        tokio::spawn(async move {
            let mut buf = [0u8; READ_CHUNK];
            loop {
                match pty_reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if output_tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        // EIO is expected when PTY closes
                        if e.raw_os_error() != Some(5) {
                            warn!("PTY read error for {}: {}", id.short(), e);
                        }
                        break;
                    }
                }
            }
            debug!("PTY reader for {} finished", id.short());
        });

        tokio::spawn(async move {
            while let Some(chunk) = input_rx.recv().await {
                if pty_writer.write_all(&chunk).await.is_err() {
                    break;
                }
                let _ = pty_writer.flush().await;
            }
            debug!("PTY writer for {} finished", id.short());
        });

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exited_tx, exited_rx) = oneshot::channel::<()>();

        // Registered before the monitor runs so an early exit can remove it
        self.processes.lock().await.insert(
            id,
            ProcessHandle {
                kill: kill_tx,
                exited: exited_rx,
            },
        );

        let processes = self.processes.clone();
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    info!("Process for {} exited: {:?}", id.short(), status);
                    processes.lock().await.remove(&id);
                }
                _ = kill_rx => {
                    if let Err(e) = child.start_kill() {
                        warn!("Failed to kill process for {}: {}", id.short(), e);
                    }
                    let status = child.wait().await;
                    info!("Process for {} killed: {:?}", id.short(), status);
                }
            }
            let _ = exited_tx.send(());
        });

        Ok(ProcessIo {
            pid,
            input: input_tx,
            output: output_rx,
        })
    }

    #[instrument(skip(self), fields(session = %id.short()))]
    async fn terminate(&self, id: &SessionId) -> Result<(), StreamError> {
        let Some(handle) = self.processes.lock().await.remove(id) else {
            debug!("No running process");
            return Ok(());
        };

        let _ = handle.kill.send(());
        match tokio::time::timeout(self.settings.kill_timeout, handle.exited).await {
            Ok(_) => Ok(()),
            Err(_) => Err(StreamError::KillTimeout(*id, self.settings.kill_timeout)),
        }
    }
}

/// Pick the program to run: the configured one when it is on `path_var`,
/// otherwise an interactive shell.
pub fn resolve_program(
    program: &str,
    shell: &str,
    path_var: Option<std::ffi::OsString>,
) -> (String, Vec<String>) {
    let mut words = program.split_whitespace();
    if let Some(bin) = words.next() {
        if find_executable(bin, path_var.as_deref()).is_some() {
            return (bin.to_string(), words.map(str::to_string).collect());
        }
        debug!("{} not found on PATH, falling back to {}", bin, shell);
    }
    (shell.to_string(), vec!["-i".to_string()])
}

fn find_executable(bin: &str, path_var: Option<&std::ffi::OsStr>) -> Option<PathBuf> {
    if bin.contains('/') {
        let path = Path::new(bin);
        return path.is_file().then(|| path.to_path_buf());
    }

    std::env::split_paths(path_var?)
        .map(|dir| dir.join(bin))
        .find(|candidate| candidate.is_file())
}
