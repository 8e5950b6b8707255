//! Message queue and the single broadcaster that drains it.
//!
//! Sessions enqueue [`Message`]s through a cloneable [`Dispatcher`]. The queue
//! is bounded: a producer waits when it is full, but producers never hold a
//! registry lock while they wait. Exactly one [`Broadcaster`] consumes the
//! queue, so messages for one room reach its members in enqueue order.
//!
//! The broadcaster never touches a socket. For each recipient it makes one
//! non-blocking `try_send` into that connection's bounded outbox, and the
//! recipient's own session writes it out. A full outbox means the peer has
//! stalled, and a closed one means the session is gone. Either way that
//! recipient is disconnected and the rest of the room still gets the line.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{error::DispatcherClosed, state::RelayState};

/// A chat line bound for every member of `room`.
///
/// `text` is fully formatted when enqueued, so later renames do not change
/// messages already in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub room: String,
    pub text: String,
}

/// Producer handle for the broadcast queue.
#[derive(Clone)]
pub struct Dispatcher {
    sender: mpsc::Sender<Message>,
}

impl Dispatcher {
    /// Creates the queue and its single consumer.
    pub fn channel(capacity: usize, state: Arc<RelayState>) -> (Self, Broadcaster) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, Broadcaster { receiver, state })
    }

    pub async fn enqueue(&self, message: Message) -> Result<(), DispatcherClosed> {
        self.reserve().await?.send(message);
        Ok(())
    }

    /// Waits for space in the queue without committing a message yet.
    ///
    /// Lets a session keep draining its own outbox while the queue is full.
    pub async fn reserve(&self) -> Result<Slot<'_>, DispatcherClosed> {
        let permit = self.sender.reserve().await.map_err(|_| DispatcherClosed)?;
        Ok(Slot { permit })
    }
}

/// One reserved place in the broadcast queue.
pub struct Slot<'a> {
    permit: mpsc::Permit<'a, Message>,
}

impl Slot<'_> {
    pub fn send(self, message: Message) {
        self.permit.send(message);
    }
}

/// Outcome of fanning out one message.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub dropped: usize,
}

pub struct Broadcaster {
    receiver: mpsc::Receiver<Message>,
    state: Arc<RelayState>,
}

impl Broadcaster {
    /// Drains the queue until every [`Dispatcher`] handle has been dropped.
    pub async fn run(mut self) {
        while let Some(message) = self.receiver.recv().await {
            let report = self.broadcast(&message).await;
            debug!(
                room = %message.room,
                delivered = report.delivered,
                dropped = report.dropped,
                "broadcast message"
            );
        }
        debug!("broadcaster stopped");
    }

    /// Hands `message` to every current member of its room.
    pub async fn broadcast(&self, message: &Message) -> DeliveryReport {
        let members = self.state.rooms.members(&message.room).await;
        let mut report = DeliveryReport::default();

        for member in members {
            match member.deliver(message.text.clone()) {
                Ok(()) => report.delivered += 1,
                Err(error) => {
                    report.dropped += 1;
                    let name = self.state.disconnect(&member).await;
                    warn!(
                        conn = member.id(),
                        peer = %member.peer(),
                        name = name.as_deref().unwrap_or("<unregistered>"),
                        room = %message.room,
                        %error,
                        "disconnecting recipient during broadcast"
                    );
                }
            }
        }

        report
    }
}
