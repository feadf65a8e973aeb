//! Shared fixtures for integration tests
//!
//! Sessions run against an in-process echo "program" instead of a PTY, and
//! worktrees are provisioned as plain paths, so no git or shell is needed.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempDir;
use tokio::sync::{Mutex, mpsc, oneshot};

use claude_manager::browser::{DirectoryBrowser, FsBrowser};
use claude_manager::coordinator::Coordinator;
use claude_manager::error::{GitError, StreamError};
use claude_manager::git::{RepositoryProvisioner, WorktreeRequest};
use claude_manager::server::AppState;
use claude_manager::session::{
    CreateRequest, CreationWorkflow, Session, SessionId, SessionRegistry, SessionStatus,
    WorkflowSettings,
};
use claude_manager::terminal::{ProcessIo, ProcessSupervisor, TerminalBroker};

struct EchoProcess {
    output: mpsc::Sender<Bytes>,
    kill: oneshot::Sender<()>,
}

/// Supervisor whose processes write every input chunk back as output
#[derive(Default)]
pub struct EchoSupervisor {
    processes: Mutex<HashMap<SessionId, EchoProcess>>,
    fail_start: AtomicBool,
    pub started: AtomicUsize,
    pub terminated: AtomicUsize,
}

impl EchoSupervisor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every following `start` fail
    pub fn fail_starts(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    /// Write `data` to the session's output as if the program printed it
    pub async fn emit(&self, id: &SessionId, data: &'static [u8]) {
        let output = self
            .processes
            .lock()
            .await
            .get(id)
            .map(|p| p.output.clone())
            .expect("process running");
        output.send(Bytes::from_static(data)).await.unwrap();
    }

    /// End the process on its own
    pub async fn exit(&self, id: &SessionId) {
        if let Some(process) = self.processes.lock().await.remove(id) {
            let _ = process.kill.send(());
        }
    }

    pub async fn is_running(&self, id: &SessionId) -> bool {
        self.processes.lock().await.contains_key(id)
    }
}

#[async_trait]
impl ProcessSupervisor for EchoSupervisor {
    async fn start(&self, session: &Session) -> Result<ProcessIo, StreamError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(StreamError::Spawn("no such program".to_string()));
        }
        self.started.fetch_add(1, Ordering::SeqCst);

        let (input_tx, mut input_rx) = mpsc::channel::<Bytes>(64);
        let (output_tx, output_rx) = mpsc::channel::<Bytes>(64);
        let (kill_tx, mut kill_rx) = oneshot::channel();

        let echo = output_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut kill_rx => break,
                    input = input_rx.recv() => match input {
                        Some(bytes) => {
                            if echo.send(bytes).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        self.processes.lock().await.insert(
            session.id,
            EchoProcess {
                output: output_tx,
                kill: kill_tx,
            },
        );

        Ok(ProcessIo {
            pid: Some(4242),
            input: input_tx,
            output: output_rx,
        })
    }

    async fn terminate(&self, id: &SessionId) -> Result<(), StreamError> {
        if let Some(process) = self.processes.lock().await.remove(id) {
            let _ = process.kill.send(());
            self.terminated.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Provisioner that hands out `<repo>/../worktrees/<name>` without touching git
#[derive(Default)]
pub struct FakeProvisioner {
    pub provisioned: Mutex<Vec<WorktreeRequest>>,
}

#[async_trait]
impl RepositoryProvisioner for FakeProvisioner {
    async fn provision(&self, request: &WorktreeRequest) -> Result<PathBuf, GitError> {
        self.provisioned.lock().await.push(request.clone());
        let parent = request.repo_path.parent().unwrap_or(Path::new("/"));
        Ok(parent.join("worktrees").join(&request.session_name))
    }

    async fn current_branch(&self, _repo_path: &Path) -> Result<String, GitError> {
        Ok("main".to_string())
    }

    async fn cleanup(&self, _repo_path: &Path, _worktree_path: &Path) -> Result<(), GitError> {
        Ok(())
    }
}

/// Everything a test needs to drive sessions end to end
pub struct Harness {
    pub coordinator: Arc<Coordinator>,
    pub registry: Arc<SessionRegistry>,
    pub supervisor: Arc<EchoSupervisor>,
    pub provisioner: Arc<FakeProvisioner>,
    pub state: Arc<AppState>,
    /// Directory holding `repo/` (a repository root) and `plain/`
    pub root: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("repo/.git")).unwrap();
        std::fs::create_dir_all(root.path().join("plain")).unwrap();

        let registry = Arc::new(SessionRegistry::new());
        let broker = TerminalBroker::new(Arc::clone(&registry));
        let browser: Arc<dyn DirectoryBrowser> = Arc::new(FsBrowser::new());
        let provisioner = Arc::new(FakeProvisioner::default());
        let supervisor = EchoSupervisor::new();

        let workflow = CreationWorkflow::new(
            Arc::clone(&registry),
            Arc::clone(&browser),
            provisioner.clone(),
            WorkflowSettings::default(),
        );
        let coordinator = Coordinator::new(
            Arc::clone(&registry),
            broker,
            workflow,
            supervisor.clone(),
        );
        let state = Arc::new(AppState::new(Arc::clone(&coordinator), browser));

        Self {
            coordinator,
            registry,
            supervisor,
            provisioner,
            state,
            root,
        }
    }

    pub fn repo_path(&self) -> PathBuf {
        self.root.path().join("repo")
    }

    pub fn plain_path(&self) -> PathBuf {
        self.root.path().join("plain")
    }

    pub fn request(&self, name: &str) -> CreateRequest {
        CreateRequest {
            name: name.to_string(),
            repo_path: self.repo_path(),
            use_worktree: true,
            ..Default::default()
        }
    }

    /// Create a session and wait until its process is running
    pub async fn create_active(&self, name: &str) -> SessionId {
        let session = self.coordinator.create(self.request(name)).await.unwrap();
        self.wait_for_status(&session.id, SessionStatus::Active).await;
        session.id
    }

    pub async fn wait_for_status(&self, id: &SessionId, status: SessionStatus) {
        let reached = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(session) = self.registry.get(id).await {
                    if session.status == status {
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;

        if reached.is_err() {
            let actual = self.registry.get(id).await.map(|s| s.status);
            panic!("session never reached {status}, last seen {actual:?}");
        }
    }
}

/// Receive from an attachment with a deadline
pub async fn recv_within(output: &mut mpsc::Receiver<Bytes>) -> Option<Bytes> {
    tokio::time::timeout(Duration::from_secs(2), output.recv())
        .await
        .expect("timed out waiting for output")
}
