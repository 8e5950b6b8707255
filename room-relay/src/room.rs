//! Room existence and membership.

use std::collections::{BTreeMap, HashMap};

use tokio::sync::Mutex;

use crate::{
    connection::{Connection, ConnectionId, ConnectionRegistry},
    error::RegistryError,
};

/// Named rooms and their members.
///
/// A room exists exactly while it has at least one member: it is created by
/// the first join and removed by the leave that empties it. A connection is a
/// member of at most one room, which the `membership` index enforces.
#[derive(Default)]
pub struct RoomRegistry {
    state: Mutex<RoomState>,
}

#[derive(Default)]
struct RoomState {
    rooms: BTreeMap<String, BTreeMap<ConnectionId, Connection>>,
    membership: HashMap<ConnectionId, String>,
}

impl RoomState {
    fn remove_member(&mut self, id: ConnectionId, room: &str) -> bool {
        let Some(members) = self.rooms.get_mut(room) else {
            return false;
        };
        if members.remove(&id).is_none() {
            return false;
        }
        if members.is_empty() {
            self.rooms.remove(room);
        }
        self.membership.remove(&id);
        true
    }
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the connection to `room`, creating the room if needed.
    ///
    /// Returns `Ok(false)` when the connection was already a member. If it
    /// was in a different room it is moved out of that room in the same
    /// critical section. Closed connections are refused so a session racing
    /// its own disconnect cannot re-enter a room after eviction.
    pub async fn join(&self, connection: &Connection, room: &str) -> Result<bool, RegistryError> {
        let id = connection.id();
        let mut state = self.state.lock().await;

        if connection.is_closed() {
            return Err(RegistryError::Closed(id));
        }

        match state.membership.get(&id) {
            Some(current) if current == room => return Ok(false),
            Some(current) => {
                let current = current.clone();
                state.remove_member(id, &current);
            }
            None => {}
        }

        state
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(id, connection.clone());
        state.membership.insert(id, room.to_string());
        Ok(true)
    }

    /// Removes the connection from `room`. Returns whether it was a member.
    pub async fn leave(&self, id: ConnectionId, room: &str) -> bool {
        let mut state = self.state.lock().await;
        state.remove_member(id, room)
    }

    /// Removes the connection from whichever room holds it.
    pub async fn evict(&self, id: ConnectionId) -> Option<String> {
        let mut state = self.state.lock().await;
        let room = state.membership.get(&id).cloned()?;
        state.remove_member(id, &room);
        Some(room)
    }

    #[cfg(test)]
    pub async fn room_of(&self, id: ConnectionId) -> Option<String> {
        let state = self.state.lock().await;
        state.membership.get(&id).cloned()
    }

    /// Sorted names of every room that currently has members.
    pub async fn list_room_names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.rooms.keys().cloned().collect()
    }

    /// Snapshot of the member handles, used as the broadcast target set.
    pub async fn members(&self, room: &str) -> Vec<Connection> {
        let state = self.state.lock().await;
        state
            .rooms
            .get(room)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Display names of the members of `room`; empty if the room does not exist.
    ///
    /// The room lock stays held while the names are resolved, so neither a
    /// membership change nor a rename can land between the two reads. Lock
    /// order is rooms, then connections; nothing takes them the other way.
    pub async fn list_members(&self, room: &str, connections: &ConnectionRegistry) -> Vec<String> {
        let state = self.state.lock().await;
        let Some(members) = state.rooms.get(room) else {
            return Vec::new();
        };
        let ids: Vec<ConnectionId> = members.keys().copied().collect();
        connections.display_names(&ids).await
    }
}

#[cfg(test)]
mod tests {
    use std::{net::SocketAddr, sync::Arc};

    use super::*;
    use crate::connection::Outbox;

    fn connection(id: ConnectionId) -> (Connection, Outbox) {
        Connection::new(id, SocketAddr::from(([127, 0, 0, 1], 40000 + id as u16)), 4)
    }

    #[tokio::test]
    async fn join_creates_room_lazily() {
        let rooms = RoomRegistry::new();
        let (a, _oa) = connection(1);
        assert!(rooms.list_room_names().await.is_empty());

        assert_eq!(rooms.join(&a, "general").await, Ok(true));

        assert_eq!(rooms.list_room_names().await, vec!["general"]);
        assert_eq!(rooms.room_of(1).await.as_deref(), Some("general"));
    }

    #[tokio::test]
    async fn duplicate_join_keeps_a_single_membership() {
        let rooms = RoomRegistry::new();
        let (a, _oa) = connection(1);

        assert_eq!(rooms.join(&a, "lobby").await, Ok(true));
        assert_eq!(rooms.join(&a, "lobby").await, Ok(false));

        assert_eq!(rooms.members("lobby").await, vec![a]);
    }

    #[tokio::test]
    async fn joining_another_room_moves_the_connection() {
        let rooms = RoomRegistry::new();
        let (a, _oa) = connection(1);

        rooms.join(&a, "A").await.unwrap();
        rooms.join(&a, "B").await.unwrap();

        assert_eq!(rooms.list_room_names().await, vec!["B"]);
        assert!(rooms.members("A").await.is_empty());
        assert_eq!(rooms.members("B").await.len(), 1);
    }

    #[tokio::test]
    async fn room_disappears_when_last_member_leaves() {
        let rooms = RoomRegistry::new();
        let (a, _oa) = connection(1);
        let (b, _ob) = connection(2);
        rooms.join(&a, "general").await.unwrap();
        rooms.join(&b, "general").await.unwrap();

        assert!(rooms.leave(2, "general").await);
        assert_eq!(rooms.list_room_names().await, vec!["general"]);

        assert!(rooms.leave(1, "general").await);
        assert!(rooms.list_room_names().await.is_empty());

        rooms.join(&b, "general").await.unwrap();
        assert_eq!(rooms.list_room_names().await, vec!["general"]);
    }

    #[tokio::test]
    async fn leave_is_a_noop_for_non_members() {
        let rooms = RoomRegistry::new();
        let (a, _oa) = connection(1);
        rooms.join(&a, "general").await.unwrap();

        assert!(!rooms.leave(2, "general").await);
        assert!(!rooms.leave(1, "elsewhere").await);
        assert_eq!(rooms.members("general").await, vec![a]);
    }

    #[tokio::test]
    async fn evict_removes_from_current_room() {
        let rooms = RoomRegistry::new();
        let (a, _oa) = connection(1);
        rooms.join(&a, "general").await.unwrap();

        assert_eq!(rooms.evict(1).await.as_deref(), Some("general"));
        assert_eq!(rooms.evict(1).await, None);
        assert!(rooms.list_room_names().await.is_empty());
    }

    #[tokio::test]
    async fn closed_connections_cannot_join() {
        let rooms = RoomRegistry::new();
        let (a, _oa) = connection(1);
        a.close();

        assert_eq!(rooms.join(&a, "general").await, Err(RegistryError::Closed(1)));
        assert!(rooms.list_room_names().await.is_empty());
    }

    #[tokio::test]
    async fn list_members_resolves_current_display_names() {
        let rooms = RoomRegistry::new();
        let connections = ConnectionRegistry::new();
        let (a, _oa) = connection(1);
        let (b, _ob) = connection(2);
        connections.register(&a).await;
        connections.register(&b).await;
        rooms.join(&a, "general").await.unwrap();
        rooms.join(&b, "general").await.unwrap();

        connections.rename(1, "Alice".into()).await.unwrap();

        assert_eq!(
            rooms.list_members("general", &connections).await,
            vec!["Alice", "127.0.0.1:40002"]
        );
        assert!(rooms.list_members("missing", &connections).await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn list_members_never_mixes_membership_and_names_from_different_moments() {
        let rooms = Arc::new(RoomRegistry::new());
        let connections = Arc::new(ConnectionRegistry::new());
        let (a, _oa) = connection(1);
        let (b, _ob) = connection(2);
        connections.register(&a).await;
        connections.register(&b).await;
        connections.rename(1, "anchor".into()).await.unwrap();
        connections.rename(2, "inside".into()).await.unwrap();
        rooms.join(&a, "general").await.unwrap();
        rooms.join(&b, "general").await.unwrap();

        // While b is a member its name is always "inside"; it only carries
        // "outside" between leaving and rejoining.
        let mutator = {
            let rooms = Arc::clone(&rooms);
            let connections = Arc::clone(&connections);
            tokio::spawn(async move {
                for _ in 0..500 {
                    rooms.leave(2, "general").await;
                    connections.rename(2, "outside".into()).await.unwrap();
                    connections.rename(2, "inside".into()).await.unwrap();
                    rooms.join(&b, "general").await.unwrap();
                }
            })
        };

        while !mutator.is_finished() {
            let names = rooms.list_members("general", &connections).await;
            assert!(
                !names.iter().any(|name| name == "outside"),
                "listing saw a non-member's name: {names:?}"
            );
            tokio::task::yield_now().await;
        }
        mutator.await.unwrap();
    }
}
