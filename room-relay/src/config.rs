use crate::cli::ServerArgs;

/// Queue sizing for a running relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    /// Capacity of the shared broadcast queue. Producers wait when it is full.
    pub queue_capacity: usize,
    /// Capacity of each connection's outbox. A recipient whose outbox is full
    /// when a broadcast arrives is disconnected.
    pub outbox_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            outbox_capacity: 64,
        }
    }
}

impl From<&ServerArgs> for RelayConfig {
    fn from(args: &ServerArgs) -> Self {
        Self {
            queue_capacity: args.queue_capacity.max(1),
            outbox_capacity: args.outbox_capacity.max(1),
        }
    }
}
