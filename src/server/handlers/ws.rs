//! WebSocket streams
//!
//! `/ws/{id}` carries one session's terminal: process output goes out as
//! binary frames, viewer input comes back as binary frames (raw bytes) or
//! text frames (typed keys or JSON control frames, see [`InputFrame`]). The attachment is made before the
//! upgrade so unknown or unattachable sessions are refused with a plain
//! HTTP status.
//!
//! `/ws/events` pushes the reconciler's session changes as JSON text frames.

use std::sync::Arc;

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::parse_session_id;
use crate::reconcile::SessionChange;
use crate::server::error::ApiError;
use crate::server::state::AppState;
use crate::session::SessionId;
use crate::terminal::{Attachment, InputFrame};

/// How a terminal stream ended
enum Outcome {
    /// Viewer closed the socket
    Disconnected,
    /// Broker closed the attachment (replaced or process exited)
    Closed,
    /// Transport failure towards the viewer
    Failed(String),
}

/// GET /ws/{id}
pub async fn terminal(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_session_id(&id)?;
    let attachment = state.coordinator.select(&id).await?;
    let pending = PendingAttachment {
        state: Arc::clone(&state),
        attachment: Some(attachment),
    };

    Ok(ws.on_upgrade(move |socket| stream_terminal(socket, state, pending)))
}

/// Attachment waiting for the upgrade to complete.
///
/// Dropped without being taken when the client goes away before the
/// upgrade, in which case the viewer slot is released again.
struct PendingAttachment {
    state: Arc<AppState>,
    attachment: Option<Attachment>,
}

impl PendingAttachment {
    fn take(mut self) -> Option<Attachment> {
        self.attachment.take()
    }
}

impl Drop for PendingAttachment {
    fn drop(&mut self) {
        let Some(attachment) = self.attachment.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        debug!(
            "Upgrade for {} never completed, detaching viewer {}",
            attachment.session_id.short(),
            attachment.id
        );
        let state = Arc::clone(&self.state);
        runtime.spawn(async move {
            state
                .coordinator
                .deselect(&attachment.session_id, attachment.id)
                .await;
        });
    }
}

async fn stream_terminal(socket: WebSocket, state: Arc<AppState>, pending: PendingAttachment) {
    let Some(attachment) = pending.take() else {
        return;
    };
    let Attachment {
        session_id,
        id: attachment_id,
        mut output,
    } = attachment;
    info!("Viewer {} attached to {}", attachment_id, session_id.short());

    let (mut sender, mut receiver) = socket.split();

    let outcome = loop {
        tokio::select! {
            chunk = output.recv() => match chunk {
                Some(bytes) => {
                    if let Err(e) = sender.send(Message::Binary(bytes)).await {
                        break Outcome::Failed(e.to_string());
                    }
                }
                None => break Outcome::Closed,
            },
            message = receiver.next() => match message {
                Some(Ok(Message::Binary(data))) => {
                    forward(&state, &session_id, InputFrame::Data(data)).await;
                }
                Some(Ok(Message::Text(text))) => {
                    let frame = InputFrame::from_text_or_raw(text.as_str());
                    forward(&state, &session_id, frame).await;
                }
                Some(Ok(Message::Close(_))) | None => break Outcome::Disconnected,
                Some(Ok(_)) => {}
                Some(Err(e)) => break Outcome::Failed(e.to_string()),
            },
        }
    };

    match outcome {
        Outcome::Disconnected => {
            state.coordinator.deselect(&session_id, attachment_id).await;
        }
        Outcome::Closed => {
            let _ = sender.send(Message::Close(None)).await;
            state.coordinator.deselect(&session_id, attachment_id).await;
        }
        Outcome::Failed(reason) => {
            warn!("Viewer {} of {} failed: {}", attachment_id, session_id.short(), reason);
            state
                .coordinator
                .viewer_failed(&session_id, attachment_id, &reason)
                .await;
        }
    }
    // Detached above, so the broker never sees a dropped receiver first
    drop(output);
    info!("Viewer {} left {}", attachment_id, session_id.short());
}

async fn forward(state: &AppState, id: &SessionId, frame: InputFrame) {
    if let Err(e) = state.coordinator.dispatch(id, frame).await {
        debug!("Input for {} dropped: {}", id.short(), e);
    }
}

/// GET /ws/events
pub async fn events(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let changes = state
        .coordinator
        .subscribe()
        .await
        .ok_or_else(|| ApiError::unavailable("session polling is not running"))?;

    Ok(ws.on_upgrade(move |socket| stream_events(socket, changes)))
}

async fn stream_events(
    socket: WebSocket,
    mut changes: broadcast::Receiver<SessionChange>,
) {
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            change = changes.recv() => match change {
                Ok(change) => {
                    let Ok(json) = serde_json::to_string(&change) else { continue };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Events viewer lagged, skipped {} changes", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },
            message = receiver.next() => match message {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("Events viewer disconnected");
}
