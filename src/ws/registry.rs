//! Registry of open sessions.
//!
//! # Responsibilities
//! - Map connection ids to live sessions for lookup and fan-out
//! - Deliver unicast and broadcast frames without holding the map lock
//!   across socket writes
//! - Isolate per-member write failures
//!
//! # Design Decisions
//! - Entries are `Weak`: the session loop owns the session, and the
//!   registry never closes a socket itself
//! - A std mutex guards the map; it is only held for O(n) bookkeeping,
//!   never across an `.await`
//! - A failed member is left in place; its own loop notices the failed
//!   write and deregisters it

use futures_util::future::join_all;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use thiserror::Error;

use crate::net::connection::ConnectionId;
use crate::observability::metrics;
use crate::protocol::{Frame, ProtocolError};
use crate::ws::session::{ConnectionSession, SendError};

/// Error type for unicast delivery.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The peer is gone; a normal race with disconnects.
    #[error("connection {0} not found")]
    NotFound(ConnectionId),

    #[error("send to {id} failed: {source}")]
    Send {
        id: ConnectionId,
        #[source]
        source: SendError,
    },
}

/// Result of a fan-out.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: Vec<(ConnectionId, SendError)>,
}

impl BroadcastReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Concurrency-safe map of connection id to session.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sessions: Mutex<HashMap<ConnectionId, Weak<ConnectionSession>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, Weak<ConnectionSession>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a session. Never overwrites; returns false on a duplicate id.
    pub fn add(&self, session: &Arc<ConnectionSession>) -> bool {
        match self.lock().entry(session.id()) {
            Entry::Vacant(slot) => {
                slot.insert(Arc::downgrade(session));
                true
            }
            Entry::Occupied(_) => {
                tracing::warn!(connection_id = %session.id(), "Duplicate connection id ignored");
                false
            }
        }
    }

    /// Deregister. Absence is not an error.
    pub fn remove(&self, id: &ConnectionId) -> bool {
        self.lock().remove(id).is_some()
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ConnectionSession>> {
        self.lock().get(id).and_then(Weak::upgrade)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of the registered ids.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.lock().keys().copied().collect()
    }

    fn snapshot(&self, except: Option<ConnectionId>) -> Vec<Arc<ConnectionSession>> {
        self.lock()
            .iter()
            .filter(|(id, _)| Some(**id) != except)
            .filter_map(|(_, session)| session.upgrade())
            .collect()
    }

    /// Send one frame to one connection.
    pub async fn send_to(&self, id: ConnectionId, frame: &Frame) -> Result<(), RegistryError> {
        let session = self.get(&id).ok_or(RegistryError::NotFound(id))?;
        session
            .send(frame)
            .await
            .map_err(|source| RegistryError::Send { id, source })
    }

    /// Send `frame` to every registered connection.
    ///
    /// The frame is encoded once; only an unencodable frame fails the call.
    pub async fn broadcast(&self, frame: &Frame) -> Result<BroadcastReport, ProtocolError> {
        self.fan_out(frame, None).await
    }

    /// Send `frame` to every registered connection except `except`.
    pub async fn broadcast_except(
        &self,
        except: ConnectionId,
        frame: &Frame,
    ) -> Result<BroadcastReport, ProtocolError> {
        self.fan_out(frame, Some(except)).await
    }

    async fn fan_out(
        &self,
        frame: &Frame,
        except: Option<ConnectionId>,
    ) -> Result<BroadcastReport, ProtocolError> {
        let bytes = frame.encode()?;
        let members = self.snapshot(except);
        let recipients = members.len();

        let bytes = &bytes;
        let results = join_all(members.iter().map(|session| async move {
            (session.id(), session.send_encoded(bytes).await)
        }))
        .await;

        let mut report = BroadcastReport::default();
        for (id, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(connection_id = %id, error = %e, "Broadcast delivery failed");
                    report.failed.push((id, e));
                }
            }
        }
        metrics::record_broadcast_failures(report.failed.len());

        tracing::debug!(
            opcode = frame.opcode.name(),
            recipients,
            delivered = report.delivered,
            "Broadcast frame"
        );
        Ok(report)
    }
}
