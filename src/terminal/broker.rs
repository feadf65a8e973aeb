//! Terminal stream broker
//!
//! Owns the byte streams of every running session and the single viewer slot
//! attached to each. Output of a session flows through one pump task, so
//! viewers see bytes in exactly the order the process produced them.
//!
//! Attachments follow last-attach-wins: attaching to a session that already
//! has a viewer closes the old viewer's channel first.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, info, instrument, warn};

use super::{InputFrame, ProcessIo};
use crate::error::{Error, Result, SessionError, StreamError};
use crate::session::{SessionId, SessionRegistry, SessionStatus};

/// Outbound buffer per viewer
const VIEWER_BUFFER: usize = 256;

/// Generation counter of an attachment; unique per broker
pub type AttachmentId = u64;

/// An open viewer link to a session's output
#[derive(Debug)]
pub struct Attachment {
    pub session_id: SessionId,
    pub id: AttachmentId,
    /// Process output; yields `None` once the attachment is closed
    pub output: mpsc::Receiver<Bytes>,
}

#[derive(Debug)]
struct ViewerSlot {
    id: AttachmentId,
    tx: mpsc::Sender<Bytes>,
}

#[derive(Debug)]
struct SessionChannel {
    input: mpsc::Sender<Bytes>,
    viewer: Mutex<Option<ViewerSlot>>,
}

pub struct TerminalBroker {
    registry: Arc<SessionRegistry>,
    channels: RwLock<HashMap<SessionId, Arc<SessionChannel>>>,
    next_attachment: AtomicU64,
}

impl TerminalBroker {
    pub fn new(registry: Arc<SessionRegistry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            channels: RwLock::new(HashMap::new()),
            next_attachment: AtomicU64::new(0),
        })
    }

    /// Take over the I/O of a freshly started process
    #[instrument(skip(self, io), fields(session = %id.short()))]
    pub async fn register(self: &Arc<Self>, id: SessionId, io: ProcessIo) {
        let ProcessIo { input, mut output, .. } = io;
        let channel = Arc::new(SessionChannel {
            input,
            viewer: Mutex::new(None),
        });

        if let Some(old) = self.channels.write().await.insert(id, channel.clone()) {
            warn!("Replaced stream of {} while it was still registered", id.short());
            drop(old.viewer.lock().await.take());
        }

        let broker: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(chunk) = output.recv().await {
                let viewer = channel
                    .viewer
                    .lock()
                    .await
                    .as_ref()
                    .map(|slot| (slot.id, slot.tx.clone()));

                // Without a viewer the output is dropped
                let Some((attachment_id, tx)) = viewer else {
                    continue;
                };

                if tx.send(chunk).await.is_err() {
                    if let Some(broker) = broker.upgrade() {
                        broker
                            .fail(&id, attachment_id, "viewer channel closed")
                            .await;
                    }
                }
            }

            if let Some(broker) = broker.upgrade() {
                broker.process_exited(&id, &channel).await;
            }
        });

        debug!("Registered stream");
    }

    /// Open the single attachment of a session, replacing any existing one
    #[instrument(skip(self), fields(session = %id.short()))]
    pub async fn attach(&self, id: &SessionId) -> Result<Attachment> {
        let session = self.registry.get(id).await?;
        if !session.status.can_attach() {
            return Err(StreamError::NotAttachable {
                id: *id,
                status: session.status,
            }
            .into());
        }

        let channel = self
            .channel(id)
            .await
            .ok_or(StreamError::NotRunning(*id))?;

        let attachment_id = self.next_attachment.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::channel(VIEWER_BUFFER);

        let replaced = channel.viewer.lock().await.replace(ViewerSlot {
            id: attachment_id,
            tx,
        });
        if let Some(old) = replaced {
            info!("Attachment {} replaced by {}", old.id, attachment_id);
        }

        if session.status != SessionStatus::Active {
            if let Err(e) = self.mark(id, SessionStatus::Active).await {
                let mut slot = channel.viewer.lock().await;
                if slot.as_ref().is_some_and(|s| s.id == attachment_id) {
                    slot.take();
                }
                return Err(e);
            }
        }

        info!("Attachment {} opened", attachment_id);
        Ok(Attachment {
            session_id: *id,
            id: attachment_id,
            output: rx,
        })
    }

    /// Close whatever attachment the session has. Returns whether one was open.
    #[instrument(skip(self), fields(session = %id.short()))]
    pub async fn detach(&self, id: &SessionId) -> bool {
        let Some(channel) = self.channel(id).await else {
            return false;
        };
        let closed = channel.viewer.lock().await.take();
        match closed {
            Some(slot) => {
                self.after_detach(id, slot.id).await;
                true
            }
            None => false,
        }
    }

    /// Close `attachment_id` if it is still the session's attachment
    pub async fn detach_attachment(&self, id: &SessionId, attachment_id: AttachmentId) -> bool {
        let Some(channel) = self.channel(id).await else {
            return false;
        };

        let closed = {
            let mut slot = channel.viewer.lock().await;
            if slot.as_ref().is_some_and(|current| current.id == attachment_id) {
                slot.take()
            } else {
                None
            }
        };

        match closed {
            Some(slot) => {
                self.after_detach(id, slot.id).await;
                true
            }
            None => {
                debug!("Attachment {} no longer current", attachment_id);
                false
            }
        }
    }

    /// Forward input to the process of an attached session.
    ///
    /// Returns `false` without doing anything when no attachment is open.
    pub async fn send(&self, id: &SessionId, frame: InputFrame) -> Result<bool> {
        let Some(channel) = self.channel(id).await else {
            return Ok(false);
        };
        if channel.viewer.lock().await.is_none() {
            debug!("Dropping input for {}: no attachment", id.short());
            return Ok(false);
        }

        let input = channel.input.clone();
        input
            .send(frame.into_bytes())
            .await
            .map_err(|_| StreamError::InputClosed(*id))?;
        Ok(true)
    }

    /// Transport failure on `attachment_id`: release it and mark the session `error`
    #[instrument(skip(self), fields(session = %id.short()))]
    pub async fn fail(&self, id: &SessionId, attachment_id: AttachmentId, reason: &str) {
        let Some(channel) = self.channel(id).await else {
            return;
        };

        let released = {
            let mut slot = channel.viewer.lock().await;
            if slot.as_ref().is_some_and(|current| current.id == attachment_id) {
                slot.take()
            } else {
                None
            }
        };
        if released.is_none() {
            return;
        }

        warn!("Attachment {} failed: {}", attachment_id, reason);
        if self.mark(id, SessionStatus::Error).await.is_err() {
            self.registry.degrade(id, reason).await;
        }
    }

    /// Drop the stream of a session that is being killed. Returns whether it existed.
    pub async fn release(&self, id: &SessionId) -> bool {
        let removed = self.channels.write().await.remove(id);
        match removed {
            Some(channel) => {
                drop(channel.viewer.lock().await.take());
                debug!("Released stream of {}", id.short());
                true
            }
            None => false,
        }
    }

    /// Close every attachment and forget every stream
    pub async fn shutdown(&self) {
        let channels: Vec<_> = self.channels.write().await.drain().collect();
        for (_, channel) in &channels {
            drop(channel.viewer.lock().await.take());
        }
        info!("Broker shut down, released {} streams", channels.len());
    }

    /// Number of open attachments of a session (0 or 1)
    pub async fn attachment_count(&self, id: &SessionId) -> usize {
        match self.channel(id).await {
            Some(channel) => usize::from(channel.viewer.lock().await.is_some()),
            None => 0,
        }
    }

    pub async fn is_attached(&self, id: &SessionId) -> bool {
        self.attachment_count(id).await > 0
    }

    /// Whether the session has a registered process stream
    pub async fn is_registered(&self, id: &SessionId) -> bool {
        self.channels.read().await.contains_key(id)
    }

    async fn channel(&self, id: &SessionId) -> Option<Arc<SessionChannel>> {
        self.channels.read().await.get(id).cloned()
    }

    async fn after_detach(&self, id: &SessionId, attachment_id: AttachmentId) {
        info!("Attachment {} closed", attachment_id);
        // Only an active session goes idle; error stays error
        if matches!(self.registry.get(id).await, Ok(s) if s.status == SessionStatus::Active) {
            let _ = self.mark(id, SessionStatus::Idle).await;
        }
    }

    /// Output closed: the process is gone
    async fn process_exited(&self, id: &SessionId, channel: &Arc<SessionChannel>) {
        {
            let mut channels = self.channels.write().await;
            if channels.get(id).is_some_and(|c| Arc::ptr_eq(c, channel)) {
                channels.remove(id);
            }
        }
        drop(channel.viewer.lock().await.take());

        if let Err(e) = self.registry.kill(id).await {
            warn!("Failed to mark {} terminated: {}", id.short(), e);
        }
        info!("Process of {} exited, stream closed", id.short());
    }

    /// Transition helper: an already-reached target is not an error, and a
    /// rejected edge degrades the session.
    async fn mark(&self, id: &SessionId, to: SessionStatus) -> Result<()> {
        match self.registry.transition(id, to).await {
            Ok(_) => Ok(()),
            Err(Error::Session(SessionError::IllegalTransition { from, .. })) if from == to => {
                Ok(())
            }
            Err(Error::Session(SessionError::IllegalTransition { from, to, .. }))
                if from != SessionStatus::Terminated =>
            {
                let reason = format!("illegal transition {} -> {}", from, to);
                self.registry.degrade(id, &reason).await;
                Err(SessionError::IllegalTransition { id: *id, from, to }.into())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    use crate::session::SessionSpec;

    struct FakeProcess {
        /// Bytes the broker wrote to the process
        input: mpsc::Receiver<Bytes>,
        /// Feed process output
        output: mpsc::Sender<Bytes>,
    }

    fn spec(name: &str) -> SessionSpec {
        SessionSpec {
            name: name.to_string(),
            repo_path: PathBuf::from("/repo"),
            path: PathBuf::from("/repo"),
            branch: "main".to_string(),
            base_branch: "main".to_string(),
            use_worktree: false,
        }
    }

    async fn running(
        registry: &Arc<SessionRegistry>,
        broker: &Arc<TerminalBroker>,
        name: &str,
    ) -> (SessionId, FakeProcess) {
        let id = registry.create(spec(name)).await.unwrap().id;
        registry.transition(&id, SessionStatus::Starting).await.unwrap();

        let (input_tx, input_rx) = mpsc::channel(16);
        let (output_tx, output_rx) = mpsc::channel(16);
        broker
            .register(
                id,
                ProcessIo {
                    pid: None,
                    input: input_tx,
                    output: output_rx,
                },
            )
            .await;
        registry.transition(&id, SessionStatus::Active).await.unwrap();

        (
            id,
            FakeProcess {
                input: input_rx,
                output: output_tx,
            },
        )
    }

    fn setup() -> (Arc<SessionRegistry>, Arc<TerminalBroker>) {
        let registry = Arc::new(SessionRegistry::new());
        let broker = TerminalBroker::new(registry.clone());
        (registry, broker)
    }

    async fn status(registry: &SessionRegistry, id: &SessionId) -> SessionStatus {
        registry.get(id).await.unwrap().status
    }

    async fn wait_for(registry: &SessionRegistry, id: &SessionId, want: SessionStatus) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while status(registry, id).await != want {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_output_in_order() {
        let (registry, broker) = setup();
        let (id, process) = running(&registry, &broker, "order").await;

        let mut attachment = broker.attach(&id).await.unwrap();
        for i in 0..50u8 {
            process.output.send(Bytes::from(vec![i])).await.unwrap();
        }

        for i in 0..50u8 {
            assert_eq!(attachment.output.recv().await.unwrap().as_ref(), &[i]);
        }
    }

    #[tokio::test]
    async fn test_last_attach_wins() {
        let (registry, broker) = setup();
        let (id, process) = running(&registry, &broker, "twice").await;

        let mut first = broker.attach(&id).await.unwrap();
        let mut second = broker.attach(&id).await.unwrap();
        assert!(second.id > first.id);
        assert_eq!(broker.attachment_count(&id).await, 1);

        // The replaced viewer sees its stream end
        assert!(first.output.recv().await.is_none());

        process.output.send(Bytes::from_static(b"hi")).await.unwrap();
        assert_eq!(second.output.recv().await.unwrap().as_ref(), b"hi");
        assert_eq!(status(&registry, &id).await, SessionStatus::Active);

        // A stale attachment cannot close its successor
        assert!(!broker.detach_attachment(&id, first.id).await);
        assert!(broker.is_attached(&id).await);
    }

    #[tokio::test]
    async fn test_detach_goes_idle_and_reattach_goes_active() {
        let (registry, broker) = setup();
        let (id, _process) = running(&registry, &broker, "idle").await;

        let attachment = broker.attach(&id).await.unwrap();
        assert!(broker.detach_attachment(&id, attachment.id).await);
        assert_eq!(status(&registry, &id).await, SessionStatus::Idle);
        assert_eq!(broker.attachment_count(&id).await, 0);

        // Idempotent
        assert!(!broker.detach(&id).await);

        broker.attach(&id).await.unwrap();
        assert_eq!(status(&registry, &id).await, SessionStatus::Active);
    }

    #[tokio::test]
    async fn test_send_without_attachment_is_noop() {
        let (registry, broker) = setup();
        let (id, mut process) = running(&registry, &broker, "noop").await;

        assert!(!broker.send(&id, InputFrame::Interrupt).await.unwrap());
        assert!(process.input.try_recv().is_err());

        let _attachment = broker.attach(&id).await.unwrap();
        assert!(broker.send(&id, InputFrame::Interrupt).await.unwrap());
        assert!(
            broker
                .send(&id, InputFrame::Data(Bytes::from_static(b"ls\r")))
                .await
                .unwrap()
        );
        assert_eq!(process.input.recv().await.unwrap().as_ref(), &[0x03]);
        assert_eq!(process.input.recv().await.unwrap().as_ref(), b"ls\r");
    }

    #[tokio::test]
    async fn test_attach_rules() {
        let (registry, broker) = setup();

        let err = broker.attach(&SessionId::new()).await.unwrap_err();
        assert!(err.is_not_found());

        let id = registry.create(spec("creating")).await.unwrap().id;
        assert!(matches!(
            broker.attach(&id).await,
            Err(Error::Stream(StreamError::NotAttachable { .. }))
        ));

        // Running status but no registered process
        registry.transition(&id, SessionStatus::Starting).await.unwrap();
        registry.transition(&id, SessionStatus::Active).await.unwrap();
        assert!(matches!(
            broker.attach(&id).await,
            Err(Error::Stream(StreamError::NotRunning(_)))
        ));
    }

    #[tokio::test]
    async fn test_viewer_failure_marks_error() {
        let (registry, broker) = setup();
        let (id, process) = running(&registry, &broker, "fail").await;

        let attachment = broker.attach(&id).await.unwrap();
        drop(attachment);

        process.output.send(Bytes::from_static(b"x")).await.unwrap();
        wait_for(&registry, &id, SessionStatus::Error).await;
        assert_eq!(broker.attachment_count(&id).await, 0);

        // error -> active on a fresh attach
        broker.attach(&id).await.unwrap();
        assert_eq!(status(&registry, &id).await, SessionStatus::Active);
    }

    #[tokio::test]
    async fn test_process_exit_terminates_session() {
        let (registry, broker) = setup();
        let (id, process) = running(&registry, &broker, "exit").await;

        let mut attachment = broker.attach(&id).await.unwrap();
        drop(process);

        assert!(attachment.output.recv().await.is_none());
        wait_for(&registry, &id, SessionStatus::Terminated).await;
        assert!(!broker.is_registered(&id).await);
    }

    #[tokio::test]
    async fn test_release_and_shutdown_close_viewers() {
        let (registry, broker) = setup();
        let (a, _pa) = running(&registry, &broker, "a").await;
        let (b, _pb) = running(&registry, &broker, "b").await;

        let mut va = broker.attach(&a).await.unwrap();
        let mut vb = broker.attach(&b).await.unwrap();

        assert!(broker.release(&a).await);
        assert!(!broker.release(&a).await);
        assert!(va.output.recv().await.is_none());

        broker.shutdown().await;
        assert!(vb.output.recv().await.is_none());
        assert!(!broker.is_registered(&b).await);
    }
}
