//! Client state reconciliation
//!
//! Polls a [`SessionSource`] on a fixed interval and keeps a local,
//! non-authoritative copy of the session listing:
//! - `SessionCache` - full-replace snapshot with a content fingerprint
//! - `Reconciler` - the polling loop, emitting `SessionChange` events
//!
//! Fetch failures keep the previous snapshot and are retried on the next
//! tick without backoff.

mod cache;
mod poller;

pub use cache::*;
pub use poller::*;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::session::{SessionRegistry, SessionSummary};

/// Authoritative session listing
#[async_trait]
pub trait SessionSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<SessionSummary>, FetchError>;
}

#[async_trait]
impl SessionSource for SessionRegistry {
    async fn fetch(&self) -> Result<Vec<SessionSummary>, FetchError> {
        Ok(self.list().await.iter().map(SessionSummary::from).collect())
    }
}
