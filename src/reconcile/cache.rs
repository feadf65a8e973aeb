//! Client-side session cache

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::session::{SessionId, SessionStatus, SessionSummary};

/// Delta between two consecutive snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionChange {
    Added {
        session: SessionSummary,
    },
    Removed {
        id: SessionId,
    },
    StatusChanged {
        id: SessionId,
        from: SessionStatus,
        to: SessionStatus,
    },
}

/// Snapshot of the last successful poll
#[derive(Debug, Clone, Default)]
pub struct SessionCache {
    sessions: Vec<SessionSummary>,
    fingerprint: u64,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sessions in server order
    pub fn sessions(&self) -> &[SessionSummary] {
        &self.sessions
    }

    pub fn get(&self, id: &SessionId) -> Option<&SessionSummary> {
        self.sessions.iter().find(|s| &s.id == id)
    }

    /// Hash of the serialized snapshot
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Replace the snapshot wholesale and report what changed
    pub fn replace(&mut self, sessions: Vec<SessionSummary>) -> Vec<SessionChange> {
        let fingerprint = fingerprint(&sessions);
        if fingerprint == self.fingerprint && sessions.len() == self.sessions.len() {
            return Vec::new();
        }

        let changes = diff(&self.sessions, &sessions);
        self.sessions = sessions;
        self.fingerprint = fingerprint;
        changes
    }
}

/// Content fingerprint of a listing
pub fn fingerprint(sessions: &[SessionSummary]) -> u64 {
    match serde_json::to_vec(sessions) {
        Ok(bytes) => xxh3_64(&bytes),
        Err(_) => 0,
    }
}

/// Added, removed and re-statused sessions between two listings
pub fn diff(old: &[SessionSummary], new: &[SessionSummary]) -> Vec<SessionChange> {
    let previous: HashMap<SessionId, &SessionSummary> = old.iter().map(|s| (s.id, s)).collect();
    let current: HashMap<SessionId, &SessionSummary> = new.iter().map(|s| (s.id, s)).collect();

    let mut changes = Vec::new();

    for session in new {
        match previous.get(&session.id) {
            None => changes.push(SessionChange::Added {
                session: session.clone(),
            }),
            Some(before) if before.status != session.status => {
                changes.push(SessionChange::StatusChanged {
                    id: session.id,
                    from: before.status,
                    to: session.status,
                })
            }
            Some(_) => {}
        }
    }

    for session in old {
        if !current.contains_key(&session.id) {
            changes.push(SessionChange::Removed { id: session.id });
        }
    }

    changes
}
