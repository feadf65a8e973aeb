//! Coordinator - composition root of the session machinery
//!
//! Built once at startup and shared behind an `Arc`. Routes user actions
//! (create, select, send input, interrupt, kill) to the workflow, the broker
//! and the supervisor, and owns the current attachment and the reconciler.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Mutex, broadcast};
use tracing::{info, instrument, warn};

use crate::error::{Error, Result, SessionError};
use crate::reconcile::{ReconcilerHandle, SessionChange};
use crate::session::{
    CreateRequest, CreationWorkflow, Session, SessionId, SessionRegistry, SessionStatus,
    SessionSummary,
};
use crate::terminal::{Attachment, AttachmentId, InputFrame, ProcessSupervisor, TerminalBroker};

pub struct Coordinator {
    registry: Arc<SessionRegistry>,
    broker: Arc<TerminalBroker>,
    workflow: CreationWorkflow,
    supervisor: Arc<dyn ProcessSupervisor>,
    current: Mutex<Option<(SessionId, AttachmentId)>>,
    reconciler: Mutex<Option<ReconcilerHandle>>,
}

impl Coordinator {
    pub fn new(
        registry: Arc<SessionRegistry>,
        broker: Arc<TerminalBroker>,
        workflow: CreationWorkflow,
        supervisor: Arc<dyn ProcessSupervisor>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            broker,
            workflow,
            supervisor,
            current: Mutex::new(None),
            reconciler: Mutex::new(None),
        })
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn broker(&self) -> &Arc<TerminalBroker> {
        &self.broker
    }

    /// Hand over the polling loop so `shutdown` can stop it
    pub async fn set_reconciler(&self, handle: ReconcilerHandle) {
        if let Some(previous) = self.reconciler.lock().await.replace(handle) {
            previous.stop().await;
        }
    }

    /// Subscribe to change events of the installed reconciler
    pub async fn subscribe(&self) -> Option<broadcast::Receiver<SessionChange>> {
        self.reconciler.lock().await.as_ref().map(|r| r.subscribe())
    }

    /// Create a session and launch its program in the background.
    ///
    /// Returns the record while it is still `creating`.
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create(self: &Arc<Self>, request: CreateRequest) -> Result<Session> {
        let session = self.workflow.submit(request).await?;

        let coordinator = Arc::clone(self);
        let launched = session.clone();
        tokio::spawn(async move {
            coordinator.launch(launched).await;
        });

        Ok(session)
    }

    /// creating -> starting -> active, or error when the program cannot start
    async fn launch(&self, session: Session) {
        let id = session.id;
        if let Err(e) = self.registry.transition(&id, SessionStatus::Starting).await {
            warn!("Session {} not launched: {}", id.short(), e);
            return;
        }

        let io = match self.supervisor.start(&session).await {
            Ok(io) => io,
            Err(e) => {
                self.registry.degrade(&id, &e.to_string()).await;
                return;
            }
        };

        if let Err(e) = self.registry.set_pid(&id, io.pid).await {
            warn!("Failed to record pid for {}: {}", id.short(), e);
        }
        self.broker.register(id, io).await;

        match self.registry.transition(&id, SessionStatus::Active).await {
            Ok(_) => info!("Session {} is active", id.short()),
            // Killed while starting: nobody will use this process
            Err(e) if e.is_not_found() || is_terminated_edge(&e) => {
                self.broker.release(&id).await;
                if let Err(e) = self.supervisor.terminate(&id).await {
                    warn!("Failed to stop orphaned process of {}: {}", id.short(), e);
                }
            }
            Err(e) => {
                self.registry.degrade(&id, &e.to_string()).await;
            }
        }
    }

    /// Attach the viewer to `id`, detaching it from the previously selected session
    #[instrument(skip(self), fields(session = %id.short()))]
    pub async fn select(&self, id: &SessionId) -> Result<Attachment> {
        let mut current = self.current.lock().await;

        if let Some((previous, attachment_id)) = current.take() {
            if previous != *id {
                self.broker.detach_attachment(&previous, attachment_id).await;
            }
        }

        let attachment = self.broker.attach(id).await?;
        *current = Some((*id, attachment.id));
        Ok(attachment)
    }

    /// Viewer of `attachment_id` went away
    pub async fn deselect(&self, id: &SessionId, attachment_id: AttachmentId) {
        {
            let mut current = self.current.lock().await;
            if *current == Some((*id, attachment_id)) {
                current.take();
            }
        }
        self.broker.detach_attachment(id, attachment_id).await;
    }

    /// Transport error on a viewer
    pub async fn viewer_failed(&self, id: &SessionId, attachment_id: AttachmentId, reason: &str) {
        {
            let mut current = self.current.lock().await;
            if *current == Some((*id, attachment_id)) {
                current.take();
            }
        }
        self.broker.fail(id, attachment_id, reason).await;
    }

    /// Session the viewer is attached to
    pub async fn current(&self) -> Option<SessionId> {
        self.current.lock().await.map(|(id, _)| id)
    }

    pub async fn send_input(&self, id: &SessionId, data: Bytes) -> Result<bool> {
        self.broker.send(id, InputFrame::Data(data)).await
    }

    pub async fn interrupt(&self, id: &SessionId) -> Result<bool> {
        self.broker.send(id, InputFrame::Interrupt).await
    }

    /// Dispatch a decoded viewer frame
    pub async fn dispatch(&self, id: &SessionId, frame: InputFrame) -> Result<bool> {
        self.broker.send(id, frame).await
    }

    /// Terminate a session and purge its record. Idempotent.
    ///
    /// Waits for the process to exit (bounded by the supervisor's kill
    /// timeout) before the record is removed.
    #[instrument(skip(self), fields(session = %id.short()))]
    pub async fn kill(&self, id: &SessionId) -> Result<()> {
        {
            let mut current = self.current.lock().await;
            if current.is_some_and(|(selected, _)| selected == *id) {
                current.take();
            }
        }

        self.broker.release(id).await;
        if let Err(e) = self.supervisor.terminate(id).await {
            warn!("Process of {} did not stop cleanly: {}", id.short(), e);
        }

        self.registry.kill(id).await?;
        if self.registry.remove(id).await?.is_some() {
            info!("Session {} killed", id.short());
        }
        Ok(())
    }

    pub async fn list(&self) -> Vec<SessionSummary> {
        self.registry.list().await.iter().map(SessionSummary::from).collect()
    }

    pub async fn get(&self, id: &SessionId) -> Result<Session> {
        self.registry.get(id).await
    }

    /// Close every attachment, terminate every process and stop polling
    pub async fn shutdown(&self) {
        if let Some(reconciler) = self.reconciler.lock().await.take() {
            reconciler.stop().await;
        }
        self.current.lock().await.take();
        self.broker.shutdown().await;

        for session in self.registry.list().await {
            if let Err(e) = self.supervisor.terminate(&session.id).await {
                warn!("Process of {} did not stop cleanly: {}", session.id.short(), e);
            }
            let _ = self.registry.kill(&session.id).await;
        }
        info!("Coordinator shut down");
    }
}

fn is_terminated_edge(err: &Error) -> bool {
    matches!(
        err,
        Error::Session(SessionError::IllegalTransition {
            from: SessionStatus::Terminated,
            ..
        })
    )
}
