//! Polling loop

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{SessionCache, SessionChange, SessionSource};
use crate::error::FetchError;
use crate::session::SessionSummary;

/// Default poll cadence
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default bound on a single fetch
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Buffered change events per subscriber
const EVENT_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerSettings {
    pub interval: Duration,
    pub request_timeout: Duration,
}

impl ReconcilerSettings {
    /// Settings with the request timeout clamped below the interval
    pub fn new(interval: Duration, request_timeout: Duration) -> Self {
        let request_timeout = if request_timeout >= interval {
            interval * 4 / 5
        } else {
            request_timeout
        };
        Self {
            interval,
            request_timeout,
        }
    }
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_REQUEST_TIMEOUT)
    }
}

/// Keeps a [`SessionCache`] in step with a [`SessionSource`]
pub struct Reconciler {
    source: Arc<dyn SessionSource>,
    cache: RwLock<SessionCache>,
    events: broadcast::Sender<SessionChange>,
    settings: ReconcilerSettings,
}

impl Reconciler {
    pub fn new(source: Arc<dyn SessionSource>, settings: ReconcilerSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            source,
            cache: RwLock::new(SessionCache::new()),
            events,
            settings,
        }
    }

    pub fn settings(&self) -> ReconcilerSettings {
        self.settings
    }

    /// Change events of every successful poll from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.events.subscribe()
    }

    /// Sessions as of the last successful poll
    pub async fn snapshot(&self) -> Vec<SessionSummary> {
        self.cache.read().await.sessions().to_vec()
    }

    /// Poll once. On failure the cache is left untouched.
    pub async fn tick(&self) -> Result<Vec<SessionChange>, FetchError> {
        let timeout = self.settings.request_timeout;
        let sessions = tokio::time::timeout(timeout, self.source.fetch())
            .await
            .map_err(|_| FetchError::Timeout(timeout))??;

        let changes = self.cache.write().await.replace(sessions);
        for change in &changes {
            // No subscribers is fine
            let _ = self.events.send(change.clone());
        }

        if !changes.is_empty() {
            debug!("Poll produced {} changes", changes.len());
        }
        Ok(changes)
    }

    /// Run [`tick`](Self::tick) on the configured interval until stopped
    pub fn spawn(self) -> ReconcilerHandle {
        let reconciler = Arc::new(self);
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn({
            let reconciler = reconciler.clone();
            async move {
                let mut interval = tokio::time::interval(reconciler.settings.interval);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Err(e) = reconciler.tick().await {
                                warn!("Session poll failed, keeping previous snapshot: {}", e);
                            }
                        }
                        _ = stop_rx.changed() => break,
                    }
                }
                info!("Reconciler stopped");
            }
        });

        ReconcilerHandle {
            reconciler,
            stop: stop_tx,
            task,
        }
    }
}

/// Running reconciler; dropping it also stops polling
pub struct ReconcilerHandle {
    reconciler: Arc<Reconciler>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReconcilerHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.reconciler.subscribe()
    }

    pub async fn snapshot(&self) -> Vec<SessionSummary> {
        self.reconciler.snapshot().await
    }

    /// Stop polling and wait for the loop to exit
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}
