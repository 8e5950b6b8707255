//! Connection handles and the registry of live connections.

use std::{
    collections::BTreeMap,
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::sync::{Mutex, Notify, mpsc};

use crate::error::{DeliveryError, RegistryError};

pub type ConnectionId = u64;

/// Shared handle to one client session.
///
/// Cloned into the registries and into broadcast snapshots. The session task
/// owns the matching [`Outbox`] and the socket itself; everyone else talks to
/// the session through this handle.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    id: ConnectionId,
    peer: SocketAddr,
    outbox: mpsc::Sender<String>,
    closed: AtomicBool,
    close_signal: Notify,
}

/// Receiving end of a connection's outbound queue.
pub struct Outbox {
    receiver: mpsc::Receiver<String>,
}

impl Outbox {
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }
}

impl Connection {
    /// Creates a handle whose outbox buffers at most `outbox_capacity` lines.
    pub fn new(id: ConnectionId, peer: SocketAddr, outbox_capacity: usize) -> (Self, Outbox) {
        let (outbox, receiver) = mpsc::channel(outbox_capacity.max(1));
        let connection = Self {
            inner: Arc::new(Inner {
                id,
                peer,
                outbox,
                closed: AtomicBool::new(false),
                close_signal: Notify::new(),
            }),
        };
        (connection, Outbox { receiver })
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.inner.peer
    }

    /// Queues a line for the session to write, without waiting.
    pub fn deliver(&self, line: String) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Gone);
        }
        self.inner.outbox.try_send(line).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Stalled,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Gone,
        })
    }

    /// Marks the connection closed and wakes its session.
    ///
    /// Idempotent. The session races all of its work against this signal,
    /// so it stops even while parked on a write to a peer that has stopped
    /// reading.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.close_signal.notify_one();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Resolves once [`Connection::close`] has been called.
    pub async fn closed(&self) {
        if self.is_closed() {
            return;
        }
        self.inner.close_signal.notified().await;
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("peer", &self.peer())
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct Entry {
    display_name: String,
    connection: Connection,
}

/// Every live connection and its display name.
///
/// A single mutex guards the whole map; each method holds it for exactly one
/// logical operation. Keyed by id so snapshots come out in accept order.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: Mutex<BTreeMap<ConnectionId, Entry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the connection under its peer address and returns that name.
    pub async fn register(&self, connection: &Connection) -> String {
        let display_name = connection.peer().to_string();
        let mut entries = self.entries.lock().await;
        entries.insert(
            connection.id(),
            Entry {
                display_name: display_name.clone(),
                connection: connection.clone(),
            },
        );
        display_name
    }

    pub async fn rename(&self, id: ConnectionId, new_name: String) -> Result<(), RegistryError> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        entry.display_name = new_name;
        Ok(())
    }

    /// Removes the connection, returning its last display name if it was present.
    pub async fn unregister(&self, id: ConnectionId) -> Option<String> {
        let mut entries = self.entries.lock().await;
        entries.remove(&id).map(|entry| entry.display_name)
    }

    pub async fn lookup(&self, id: ConnectionId) -> Result<String, RegistryError> {
        let entries = self.entries.lock().await;
        entries
            .get(&id)
            .map(|entry| entry.display_name.clone())
            .ok_or(RegistryError::NotFound(id))
    }

    /// Point-in-time list of every registered connection, in accept order.
    pub async fn snapshot_all(&self) -> Vec<(ConnectionId, String)> {
        let entries = self.entries.lock().await;
        entries
            .iter()
            .map(|(id, entry)| (*id, entry.display_name.clone()))
            .collect()
    }

    /// Resolves display names for `ids`, skipping any that are no longer registered.
    pub async fn display_names(&self, ids: &[ConnectionId]) -> Vec<String> {
        let entries = self.entries.lock().await;
        ids.iter()
            .filter_map(|id| entries.get(id).map(|entry| entry.display_name.clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Signals every registered connection to close. Used on server shutdown.
    pub async fn close_all(&self) {
        let connections: Vec<Connection> = {
            let entries = self.entries.lock().await;
            entries.values().map(|entry| entry.connection.clone()).collect()
        };
        for connection in connections {
            connection.close();
        }
    }
}
