use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc;
use uuid::Uuid;

use amity_types::events::ChatEvent;

/// Live connections per authenticated user. A user may hold several open
/// connections at once (tabs, devices); the inner map is keyed by
/// connection id. Locking is per dashmap shard, so traffic for unrelated
/// users never serializes on one lock.
///
/// Registry mutation and delivery never await: events go into unbounded
/// per-connection channels and the socket tasks drain them.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<DashMap<Uuid, HashMap<Uuid, mpsc::UnboundedSender<ChatEvent>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to the user's set. The first registration for a
    /// user creates their personal channel. Idempotent per connection id.
    pub fn register(&self, user_id: Uuid, conn_id: Uuid, tx: mpsc::UnboundedSender<ChatEvent>) {
        self.inner.entry(user_id).or_default().insert(conn_id, tx);
    }

    /// Remove a connection on disconnect. The user's entry is dropped
    /// entirely when their last connection goes away.
    pub fn unregister(&self, user_id: Uuid, conn_id: Uuid) {
        if let Entry::Occupied(mut entry) = self.inner.entry(user_id) {
            entry.get_mut().remove(&conn_id);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
    }

    /// Send an event to every connection of one user. A user with no open
    /// connections is a silent no-op; a connection that closed mid-send is
    /// skipped, not an error.
    pub fn deliver(&self, user_id: Uuid, event: &ChatEvent) {
        if let Some(conns) = self.inner.get(&user_id) {
            for tx in conns.values() {
                let _ = tx.send(event.clone());
            }
        }
    }

    /// Send an event to every open connection across all users.
    pub fn broadcast(&self, event: &ChatEvent) {
        for conns in self.inner.iter() {
            for tx in conns.values() {
                let _ = tx.send(event.clone());
            }
        }
    }

    /// Number of open connections for a user.
    pub fn connection_count(&self, user_id: Uuid) -> usize {
        self.inner.get(&user_id).map_or(0, |conns| conns.len())
    }
}
