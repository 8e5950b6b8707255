use thiserror::Error;

use crate::connection::ConnectionId;

/// Failures reported by the connection and room registries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("connection {0} is not registered")]
    NotFound(ConnectionId),
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
}

/// Why a broadcast line could not be handed to a recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("recipient outbox is full")]
    Stalled,
    #[error("recipient session has ended")]
    Gone,
}

/// The broadcaster has stopped and no longer accepts messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("dispatcher queue is closed")]
pub struct DispatcherClosed;
