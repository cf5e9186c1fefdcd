//! Session registry: which identity is reachable through which live
//! connection right now.
//!
//! At most one handle per identity is kept. A newer handshake for the same
//! identity replaces (and closes) the older handle. Every mutation triggers a
//! presence broadcast while the registry lock is still held, so clients
//! observe presence sets in the same order as the mutations that produced
//! them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use murmur_shared::constants::CLOSE_SUPERSEDED;
use murmur_shared::{PushEvent, UserId};

use crate::error::DeliveryError;
use crate::presence;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id of one push connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// What the connection's writer task is asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Event(PushEvent),
    Close { code: u16, reason: &'static str },
}

/// Sending half of one live push connection, bound to one identity.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    identity: UserId,
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its writer task drains.
    pub fn new(identity: UserId) -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: ConnectionId::next(),
            identity,
            tx,
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn identity(&self) -> &UserId {
        &self.identity
    }

    /// The writer task is gone; nothing pushed here will be delivered.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn push(&self, event: PushEvent) -> Result<(), DeliveryError> {
        self.tx
            .send(Outgoing::Event(event))
            .map_err(|_| DeliveryError::Closed(self.id))
    }

    /// Ask the writer to send a close frame and stop.
    pub fn close(&self, code: u16, reason: &'static str) {
        let _ = self.tx.send(Outgoing::Close { code, reason });
    }
}

/// Identity → live connection, guarded by a single lock.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<UserId, ConnectionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handle` to its identity. Returns the handle it replaced, which
    /// has already been told to close.
    pub async fn register(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let mut sessions = self.sessions.lock().await;

        let identity = handle.identity().clone();
        let conn = handle.id();
        let previous = sessions.insert(identity.clone(), handle);

        if let Some(ref old) = previous {
            old.close(CLOSE_SUPERSEDED, "Superseded by a newer connection");
            info!(
                user = %identity,
                old_conn = %old.id(),
                new_conn = %conn,
                "Replaced existing session"
            );
        } else {
            info!(user = %identity, conn = %conn, online = sessions.len(), "Session registered");
        }

        presence::broadcast_presence(&sessions);
        previous
    }

    /// Remove `handle` if it is still the current one for its identity.
    /// A handle that was already superseded is ignored.
    pub async fn unregister(&self, handle: &ConnectionHandle) -> bool {
        let mut sessions = self.sessions.lock().await;

        let is_current = sessions
            .get(handle.identity())
            .is_some_and(|current| current.id() == handle.id());

        if !is_current {
            debug!(
                user = %handle.identity(),
                conn = %handle.id(),
                "Ignoring unregister of superseded session"
            );
            return false;
        }

        sessions.remove(handle.identity());
        info!(
            user = %handle.identity(),
            conn = %handle.id(),
            online = sessions.len(),
            "Session unregistered"
        );

        presence::broadcast_presence(&sessions);
        true
    }

    /// Current live handle for `identity`, if any.
    pub async fn lookup(&self, identity: &UserId) -> Option<ConnectionHandle> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(identity)
            .filter(|handle| !handle.is_closed())
            .cloned()
    }

    /// Relay `event` to every connection except `origin`.
    pub async fn relay_from(&self, origin: &ConnectionHandle, event: PushEvent) -> usize {
        let sessions = self.sessions.lock().await;
        presence::broadcast_except(&sessions, origin.id(), &event)
    }

    /// Snapshot of the presence set.
    pub async fn presence(&self) -> Vec<UserId> {
        presence::presence_set(&*self.sessions.lock().await)
    }

    pub async fn online_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
