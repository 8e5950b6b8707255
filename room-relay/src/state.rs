use std::sync::atomic::{AtomicU64, Ordering};

use crate::{
    connection::{Connection, ConnectionId, ConnectionRegistry},
    room::RoomRegistry,
};

/// The shared registries plus connection id allocation.
///
/// These are the only shared mutable state in the relay.
pub struct RelayState {
    pub connections: ConnectionRegistry,
    pub rooms: RoomRegistry,
    next_id: AtomicU64,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    pub fn new() -> Self {
        Self {
            connections: ConnectionRegistry::new(),
            rooms: RoomRegistry::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Closes the connection and removes it from both registries.
    ///
    /// The closed flag is set before eviction so a concurrent `/join` from
    /// the same session is refused instead of re-adding the member. Safe to
    /// call more than once; returns the display name if it was still
    /// registered.
    pub async fn disconnect(&self, connection: &Connection) -> Option<String> {
        connection.close();
        self.rooms.evict(connection.id()).await;
        self.connections.unregister(connection.id()).await
    }
}
