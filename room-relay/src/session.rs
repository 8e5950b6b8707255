//! Per-connection control loop.
//!
//! A session reads one line at a time. Commands act on the registries and are
//! answered on the same connection; chat lines are stamped with the sender's
//! current display name and handed to the [`Dispatcher`]. Broadcast lines for
//! this connection arrive through its [`Outbox`] and are written by the same
//! task, so every write to the socket happens in one place.
//!
//! The outbox is drained before the next input line is read and while a chat
//! line waits for queue space. Otherwise a session's own echoes would pile up
//! behind its input and the broadcaster would take it for a stalled peer.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use futures::StreamExt;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    select,
};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use crate::{
    connection::{Connection, Outbox},
    dispatcher::{Dispatcher, Message},
    protocol::{self, Input, write_line, write_lines},
    state::RelayState,
};

/// Which room, if any, the session is currently in.
///
/// Owned and mutated only by the session task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unbound,
    Bound(String),
}

enum Flow {
    Continue,
    Exit,
}

pub struct SessionHandler<W> {
    connection: Connection,
    state: Arc<RelayState>,
    dispatcher: Dispatcher,
    writer: W,
    room: SessionState,
}

impl<W> SessionHandler<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(
        connection: Connection,
        state: Arc<RelayState>,
        dispatcher: Dispatcher,
        writer: W,
    ) -> Self {
        Self {
            connection,
            state,
            dispatcher,
            writer,
            room: SessionState::Unbound,
        }
    }

    /// Registers the connection, serves it until it ends, then cleans up.
    ///
    /// Cleanup runs on every exit path, including I/O errors, which are
    /// returned to the caller after the connection has been unregistered.
    pub async fn run<R>(mut self, reader: R, mut outbox: Outbox) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let display_name = self.state.connections.register(&self.connection).await;
        info!(
            conn = self.connection.id(),
            peer = %self.connection.peer(),
            name = %display_name,
            "client connected"
        );

        let connection = self.connection.clone();
        let result = select! {
            result = self.serve(reader, &mut outbox) => result,
            _ = connection.closed() => {
                debug!(conn = connection.id(), "connection closed by relay");
                Ok(())
            }
        };
        self.cleanup().await;
        result
    }

    async fn serve<R>(&mut self, reader: R, outbox: &mut Outbox) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        write_lines(&mut self.writer, protocol::BANNER)
            .await
            .context("failed to send banner")?;

        let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(protocol::MAX_LINE));

        loop {
            select! {
                biased;
                outbound = outbox.recv() => {
                    let Some(outbound) = outbound else {
                        return Ok(());
                    };
                    write_line(&mut self.writer, &outbound)
                        .await
                        .context("failed to deliver broadcast")?;
                }
                line = lines.next() => {
                    let line = match line {
                        Some(Ok(line)) => line,
                        Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                            bail!("client sent a line longer than {} bytes", protocol::MAX_LINE)
                        }
                        Some(Err(LinesCodecError::Io(error))) => {
                            return Err(error).context("failed to read from client");
                        }
                        None => {
                            debug!(conn = self.connection.id(), "client closed the stream");
                            return Ok(());
                        }
                    };
                    if let Flow::Exit = self.handle_line(&line, outbox).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn handle_line(&mut self, line: &str, outbox: &mut Outbox) -> Result<Flow> {
        match Input::parse(line) {
            Input::Name(name) => self.rename(name).await,
            Input::ListAll => {
                let names = self.state.connections.snapshot_all().await;
                self.reply_all(names.into_iter().map(|(_, name)| name)).await
            }
            Input::Join(room) => self.join(room).await,
            Input::Leave => self.leave().await,
            Input::Rooms => {
                let rooms = self.state.rooms.list_room_names().await;
                self.reply_all(rooms).await
            }
            Input::List => match &self.room {
                SessionState::Bound(room) => {
                    let members = self
                        .state
                        .rooms
                        .list_members(room, &self.state.connections)
                        .await;
                    self.reply_all(members).await
                }
                SessionState::Unbound => self.reply(protocol::NOT_IN_ROOM).await,
            },
            Input::Exit => Ok(Flow::Exit),
            Input::Usage(usage) => self.reply(usage).await,
            Input::Unknown => self.reply(protocol::UNKNOWN_COMMAND).await,
            Input::Chat(text) => self.chat(&text, outbox).await,
        }
    }

    async fn rename(&mut self, name: String) -> Result<Flow> {
        let id = self.connection.id();
        if self.state.connections.rename(id, name.clone()).await.is_err() {
            debug!(conn = id, "rename after disconnect");
            return Ok(Flow::Exit);
        }
        info!(conn = id, name = %name, "client renamed");
        self.reply(&protocol::name_changed(&name)).await
    }

    async fn join(&mut self, room: String) -> Result<Flow> {
        let id = self.connection.id();
        if let SessionState::Bound(current) = &self.room {
            if *current != room {
                self.state.rooms.leave(id, current).await;
                self.room = SessionState::Unbound;
            }
        }

        if let Err(error) = self.state.rooms.join(&self.connection, &room).await {
            debug!(conn = id, %error, "join refused");
            return Ok(Flow::Exit);
        }
        info!(conn = id, room = %room, "client joined room");
        let reply = protocol::joined_room(&room);
        self.room = SessionState::Bound(room);
        self.reply(&reply).await
    }

    async fn leave(&mut self) -> Result<Flow> {
        match std::mem::replace(&mut self.room, SessionState::Unbound) {
            SessionState::Bound(room) => {
                self.state.rooms.leave(self.connection.id(), &room).await;
                info!(conn = self.connection.id(), room = %room, "client left room");
                self.reply(protocol::LEFT_ROOM).await
            }
            SessionState::Unbound => self.reply(protocol::NOT_IN_ROOM).await,
        }
    }

    async fn chat(&mut self, text: &str, outbox: &mut Outbox) -> Result<Flow> {
        let SessionState::Bound(room) = &self.room else {
            return self.reply(protocol::NOT_IN_ROOM_CHAT).await;
        };
        let room = room.clone();

        let id = self.connection.id();
        let Ok(display_name) = self.state.connections.lookup(id).await else {
            debug!(conn = id, "chat after disconnect");
            return Ok(Flow::Exit);
        };
        let message = Message {
            room,
            text: protocol::chat_line(&display_name, text),
        };

        let reserve = self.dispatcher.reserve();
        tokio::pin!(reserve);
        let slot = loop {
            select! {
                slot = &mut reserve => break slot,
                outbound = outbox.recv() => {
                    let Some(outbound) = outbound else {
                        return Ok(Flow::Exit);
                    };
                    write_line(&mut self.writer, &outbound)
                        .await
                        .context("failed to deliver broadcast")?;
                }
            }
        };

        match slot {
            Ok(slot) => {
                slot.send(message);
                Ok(Flow::Continue)
            }
            Err(error) => {
                warn!(conn = id, %error, "dropping chat line");
                Ok(Flow::Exit)
            }
        }
    }

    async fn reply(&mut self, line: &str) -> Result<Flow> {
        write_line(&mut self.writer, line)
            .await
            .context("failed to write reply")?;
        Ok(Flow::Continue)
    }

    async fn reply_all<I, S>(&mut self, lines: I) -> Result<Flow>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        write_lines(&mut self.writer, lines)
            .await
            .context("failed to write reply")?;
        Ok(Flow::Continue)
    }

    async fn cleanup(&mut self) {
        let id = self.connection.id();
        if let SessionState::Bound(room) = std::mem::replace(&mut self.room, SessionState::Unbound)
        {
            self.state.rooms.leave(id, &room).await;
        }
        let name = self.state.disconnect(&self.connection).await;

        if let Err(error) = self.writer.shutdown().await {
            debug!(conn = id, ?error, "failed to shut down writer");
        }

        info!(
            conn = id,
            peer = %self.connection.peer(),
            name = name.as_deref().unwrap_or("<unregistered>"),
            "client disconnected"
        );
    }
}
